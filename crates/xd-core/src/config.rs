//! Persisted debugger configuration
//!
//! Settings live in a line-oriented text file. The first line must be
//! [`CONFIG_MARKER`]; every following non-comment line is a `param = value`
//! record. Lines starting with `#` are comments.

use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

/// First line of every debugger configuration file
pub const CONFIG_MARKER: &str = "# x86dbg debugger configuration";

/// File name used inside the platform configuration directory
pub const CONFIG_FILE_NAME: &str = "debugger.cfg";

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

/// Debugger control settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerConfig {
    /// Show general purpose registers
    pub show_general_purpose_regs: bool,
    /// Show segment selectors
    pub show_segment_regs: bool,
    /// Show control registers
    pub show_control_regs: bool,
    /// Show the FPU register stack
    pub show_fpu_regs: bool,
    /// Show test registers (386/486 only)
    pub show_test_regs: bool,
    /// Show SSE registers
    pub show_sse_regs: bool,
    /// Show debug registers
    pub show_debug_regs: bool,
    /// Disassemble with AT&T (GAS) syntax instead of Intel syntax
    pub use_gas_syntax: bool,
    /// CPU targeted by per-CPU commands
    pub selected_cpu: u8,
    /// Instruction count for "step all CPUs"
    pub global_step_count: u32,
    /// Stack entry width shown by the stack view (2, 4 or 8)
    pub stack_bytes: u8,
    /// Instruction count for "step selected CPU"
    pub cpu_step_count: u32,
    /// Display addresses as segment:offset instead of linear
    pub addr_displ_seg_ofs: bool,
    /// Memory view element size in bytes
    pub mem_displ_size: u8,
    /// Memory view start address
    pub mem_displ_addr: u64,
    /// Log verbosity
    pub log_level: LogLevel,
    /// Optional log file; logs go to stderr only when unset
    pub log_path: Option<PathBuf>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            show_general_purpose_regs: true,
            show_segment_regs: true,
            show_control_regs: true,
            show_fpu_regs: false,
            show_test_regs: false,
            show_sse_regs: false,
            show_debug_regs: false,
            use_gas_syntax: false,
            selected_cpu: 0,
            global_step_count: 1,
            stack_bytes: 4,
            cpu_step_count: 1,
            addr_displ_seg_ofs: false,
            mem_displ_size: 1,
            mem_displ_addr: 0,
            log_level: LogLevel::Info,
            log_path: None,
        }
    }
}

/// Outcome of applying one record
enum Record {
    Applied,
    Unknown,
    BadValue,
}

impl DebuggerConfig {
    /// Parse configuration text
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, |_, _| false)
    }

    /// Parse configuration text, offering unknown parameters to `extension`.
    ///
    /// `extension` returns `true` when it consumed the record. Records that
    /// neither this type nor the extension understands are logged and skipped.
    /// A missing or different header aborts parsing without applying anything.
    pub fn parse_with<F>(text: &str, mut extension: F) -> Result<Self>
    where
        F: FnMut(&str, &str) -> bool,
    {
        let mut lines = text.lines();
        let header = lines.next().ok_or(ConfigError::Empty)?;
        if header.trim_end() != CONFIG_MARKER {
            return Err(ConfigError::InvalidHeader(header.to_string()));
        }

        let mut config = Self::default();
        for (index, raw) in lines.enumerate() {
            let line_no = index + 2;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((param, value)) = line.split_once('=') else {
                warn!("Skipping malformed configuration line {}: {}", line_no, line);
                continue;
            };
            let (param, value) = (param.trim(), value.trim());

            match config.apply(param, value) {
                Record::Applied => {}
                Record::Unknown => {
                    if !extension(param, value) {
                        warn!("Skipping unknown configuration parameter '{}' on line {}", param, line_no);
                    }
                }
                Record::BadValue => {
                    warn!("Skipping invalid value '{}' for '{}' on line {}", value, param, line_no);
                }
            }
        }

        Ok(config)
    }

    fn apply(&mut self, param: &str, value: &str) -> Record {
        fn set<T>(slot: &mut T, parsed: Option<T>) -> Record {
            match parsed {
                Some(v) => {
                    *slot = v;
                    Record::Applied
                }
                None => Record::BadValue,
            }
        }

        match param {
            "show_general_purpose_regs" => set(&mut self.show_general_purpose_regs, parse_bool(value)),
            "show_segment_regs" => set(&mut self.show_segment_regs, parse_bool(value)),
            "show_control_regs" => set(&mut self.show_control_regs, parse_bool(value)),
            "show_fpu_regs" => set(&mut self.show_fpu_regs, parse_bool(value)),
            "show_test_regs" => set(&mut self.show_test_regs, parse_bool(value)),
            "show_sse_regs" => set(&mut self.show_sse_regs, parse_bool(value)),
            "show_debug_regs" => set(&mut self.show_debug_regs, parse_bool(value)),
            "use_gas_syntax" => set(&mut self.use_gas_syntax, parse_bool(value)),
            "selected_cpu" => set(&mut self.selected_cpu, parse_number(value)),
            "global_step_count" => set(&mut self.global_step_count, parse_number(value)),
            "stack_bytes" => set(
                &mut self.stack_bytes,
                parse_number::<u8>(value).filter(|b| matches!(*b, 2 | 4 | 8)),
            ),
            "cpu_step_count" => set(&mut self.cpu_step_count, parse_number(value)),
            "addr_displ_seg_ofs" => set(&mut self.addr_displ_seg_ofs, parse_bool(value)),
            "mem_displ_size" => set(&mut self.mem_displ_size, parse_number(value)),
            "mem_displ_addr" => set(&mut self.mem_displ_addr, parse_number(value)),
            "log_level" => set(&mut self.log_level, LogLevel::parse(value)),
            "log_file" => {
                self.log_path = (!value.is_empty()).then(|| PathBuf::from(value));
                Record::Applied
            }
            _ => Record::Unknown,
        }
    }

    /// Render the configuration in file form, header first
    pub fn to_config_string(&self) -> String {
        self.to_string()
    }

    /// Default configuration file location
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("x86dbg").join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        debug!("Loaded debugger configuration from {}", path.display());
        Ok(config)
    }

    /// Save to an explicit path, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_config_string()).map_err(io_err)?;
        debug!("Saved debugger configuration to {}", path.display());
        Ok(())
    }
}

impl fmt::Display for DebuggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        writeln!(out, "{}", CONFIG_MARKER)?;
        writeln!(out, "# register groups")?;
        writeln!(out, "show_general_purpose_regs = {}", self.show_general_purpose_regs)?;
        writeln!(out, "show_segment_regs = {}", self.show_segment_regs)?;
        writeln!(out, "show_control_regs = {}", self.show_control_regs)?;
        writeln!(out, "show_fpu_regs = {}", self.show_fpu_regs)?;
        writeln!(out, "show_test_regs = {}", self.show_test_regs)?;
        writeln!(out, "show_sse_regs = {}", self.show_sse_regs)?;
        writeln!(out, "show_debug_regs = {}", self.show_debug_regs)?;
        writeln!(out, "# execution control")?;
        writeln!(out, "use_gas_syntax = {}", self.use_gas_syntax)?;
        writeln!(out, "selected_cpu = {}", self.selected_cpu)?;
        writeln!(out, "global_step_count = {}", self.global_step_count)?;
        writeln!(out, "cpu_step_count = {}", self.cpu_step_count)?;
        writeln!(out, "# views")?;
        writeln!(out, "stack_bytes = {}", self.stack_bytes)?;
        writeln!(out, "addr_displ_seg_ofs = {}", self.addr_displ_seg_ofs)?;
        writeln!(out, "mem_displ_size = {}", self.mem_displ_size)?;
        writeln!(out, "mem_displ_addr = 0x{:x}", self.mem_displ_addr)?;
        writeln!(out, "# logging")?;
        writeln!(out, "log_level = {}", self.log_level.as_str())?;
        let log_file = self
            .log_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        writeln!(out, "log_file = {}", log_file)?;
        f.write_str(&out)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Decimal or `0x`-prefixed hex, range-checked into `T`
fn parse_number<T: TryFrom<u64>>(value: &str) -> Option<T> {
    let raw = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => value.parse::<u64>().ok()?,
    };
    T::try_from(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_config_parses_back() {
        let mut config = DebuggerConfig::default();
        config.show_fpu_regs = true;
        config.use_gas_syntax = true;
        config.selected_cpu = 3;
        config.mem_displ_addr = 0xB8000;
        config.log_path = Some(PathBuf::from("/tmp/x86dbg.log"));

        let text = config.to_config_string();
        assert!(text.starts_with(CONFIG_MARKER));
        assert_eq!(DebuggerConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_bad_header_aborts() {
        let text = "# some other file\nselected_cpu = 2\n";
        match DebuggerConfig::parse(text) {
            Err(ConfigError::InvalidHeader(h)) => assert_eq!(h, "# some other file"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(DebuggerConfig::parse(""), Err(ConfigError::Empty)));
    }

    #[test]
    fn test_unknown_and_malformed_lines_are_skipped() {
        let text = format!(
            "{}\n# comment\n\nfrobnicate = 1\nno equals sign here\nselected_cpu = 300\ncpu_step_count = 0x10\nshow_debug_regs = yes\n",
            CONFIG_MARKER
        );
        let config = DebuggerConfig::parse(&text).unwrap();

        // 300 does not fit the CPU index, so the default survives
        assert_eq!(config.selected_cpu, 0);
        assert_eq!(config.cpu_step_count, 16);
        assert!(config.show_debug_regs);
    }

    #[test]
    fn test_stack_bytes_must_be_a_pointer_width() {
        let text = format!("{}\nstack_bytes = 3\n", CONFIG_MARKER);
        assert_eq!(DebuggerConfig::parse(&text).unwrap().stack_bytes, 4);

        let text = format!("{}\nstack_bytes = 8\n", CONFIG_MARKER);
        assert_eq!(DebuggerConfig::parse(&text).unwrap().stack_bytes, 8);
    }

    #[test]
    fn test_extension_receives_unknown_records() {
        let text = format!("{}\nwindow_split = 40\nlog_level = debug\n", CONFIG_MARKER);
        let mut seen = Vec::new();
        let config = DebuggerConfig::parse_with(&text, |param, value| {
            seen.push((param.to_string(), value.to_string()));
            true
        })
        .unwrap();

        assert_eq!(seen, vec![("window_split".to_string(), "40".to_string())]);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_empty_log_file_clears_path() {
        let text = format!("{}\nlog_file =\n", CONFIG_MARKER);
        assert_eq!(DebuggerConfig::parse(&text).unwrap().log_path, None);
    }
}
