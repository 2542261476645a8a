//! Per-CPU register cache
//!
//! Every register the debugger shows is described once in [`REGISTERS`]:
//! the simulator parameter it binds to, its category, and its display name and
//! width for each execution mode. The cache binds the parameters once per
//! session and re-derives names, widths and values on every update.

use std::fmt;

use xd_core::{cache_trace, DebuggerConfig};

use crate::error::{DebugError, Result};
use crate::simulator::{CodeWidth, CpuMode, CpuState, ParamRef, ParamRegistry};

/// Register group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterCategory {
    General,
    Segment,
    Control,
    Fpu,
    Test,
    Sse,
    Debug,
    DescriptorTable,
}

impl RegisterCategory {
    /// Whether the configuration shows this group
    pub fn is_shown(&self, config: &DebuggerConfig) -> bool {
        match self {
            Self::General => config.show_general_purpose_regs,
            Self::Segment => config.show_segment_regs,
            Self::Control | Self::DescriptorTable => config.show_control_regs,
            Self::Fpu => config.show_fpu_regs,
            Self::Test => config.show_test_regs,
            Self::Sse => config.show_sse_regs,
            Self::Debug => config.show_debug_regs,
        }
    }
}

/// Which mode property selects the name and width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeBasis {
    /// Current code width: 16, 32 or 64-bit code
    CodeWidth,
    /// Real mode, protected mode, long mode
    Protection,
    /// Same name and width in every mode
    Fixed,
}

/// Static description of one register
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescriptor {
    /// Parameter name in the simulator registry
    pub param: &'static str,
    pub category: RegisterCategory,
    pub basis: ModeBasis,
    /// Display names, indexed by mode class
    pub names: [&'static str; 3],
    /// Bit widths, indexed by mode class
    pub widths: [u8; 3],
    /// Only present in long mode
    pub long_only: bool,
}

impl RegisterDescriptor {
    fn class(&self, mode: CpuMode) -> usize {
        match self.basis {
            ModeBasis::CodeWidth => match mode.code_width() {
                CodeWidth::Bits16 => 0,
                CodeWidth::Bits32 => 1,
                CodeWidth::Bits64 => 2,
            },
            ModeBasis::Protection => {
                if mode.is_long() {
                    2
                } else if mode.is_protected() {
                    1
                } else {
                    0
                }
            }
            ModeBasis::Fixed => 0,
        }
    }

    /// Display name and width in `mode`
    pub fn resolve(&self, mode: CpuMode) -> (&'static str, u8) {
        let class = self.class(mode);
        (self.names[class], self.widths[class])
    }
}

const fn gpr(param: &'static str, names: [&'static str; 3]) -> RegisterDescriptor {
    RegisterDescriptor {
        param,
        category: RegisterCategory::General,
        basis: ModeBasis::CodeWidth,
        names,
        widths: [16, 32, 64],
        long_only: false,
    }
}

const fn gpr64(param: &'static str, names: [&'static str; 3]) -> RegisterDescriptor {
    RegisterDescriptor {
        long_only: true,
        ..gpr(param, names)
    }
}

const fn fixed(category: RegisterCategory, param: &'static str, name: &'static str, bits: u8) -> RegisterDescriptor {
    RegisterDescriptor {
        param,
        category,
        basis: ModeBasis::Fixed,
        names: [name; 3],
        widths: [bits; 3],
        long_only: false,
    }
}

const fn by_mode(
    category: RegisterCategory,
    param: &'static str,
    names: [&'static str; 3],
    widths: [u8; 3],
) -> RegisterDescriptor {
    RegisterDescriptor {
        param,
        category,
        basis: ModeBasis::Protection,
        names,
        widths,
        long_only: false,
    }
}

const fn cr(param: &'static str) -> RegisterDescriptor {
    by_mode(RegisterCategory::Control, param, [param; 3], [32, 32, 64])
}

const fn dr(param: &'static str) -> RegisterDescriptor {
    by_mode(RegisterCategory::Debug, param, [param; 3], [32, 32, 64])
}

use RegisterCategory::{DescriptorTable, Fpu, Segment, Sse, Test};

/// Register table, in display order
pub static REGISTERS: [RegisterDescriptor; REGISTER_COUNT] = [
    gpr("RAX", ["AX", "EAX", "RAX"]),
    gpr("RBX", ["BX", "EBX", "RBX"]),
    gpr("RCX", ["CX", "ECX", "RCX"]),
    gpr("RDX", ["DX", "EDX", "RDX"]),
    gpr("RSI", ["SI", "ESI", "RSI"]),
    gpr("RDI", ["DI", "EDI", "RDI"]),
    gpr("RBP", ["BP", "EBP", "RBP"]),
    gpr("RSP", ["SP", "ESP", "RSP"]),
    gpr64("R8", ["R8W", "R8D", "R8"]),
    gpr64("R9", ["R9W", "R9D", "R9"]),
    gpr64("R10", ["R10W", "R10D", "R10"]),
    gpr64("R11", ["R11W", "R11D", "R11"]),
    gpr64("R12", ["R12W", "R12D", "R12"]),
    gpr64("R13", ["R13W", "R13D", "R13"]),
    gpr64("R14", ["R14W", "R14D", "R14"]),
    gpr64("R15", ["R15W", "R15D", "R15"]),
    gpr("RIP", ["IP", "EIP", "RIP"]),
    gpr("EFLAGS", ["FLAGS", "EFLAGS", "RFLAGS"]),
    fixed(Segment, "CS", "CS", 16),
    fixed(Segment, "DS", "DS", 16),
    fixed(Segment, "ES", "ES", 16),
    fixed(Segment, "SS", "SS", 16),
    fixed(Segment, "FS", "FS", 16),
    fixed(Segment, "GS", "GS", 16),
    // CR0 is only reachable as the machine status word before protected mode
    by_mode(RegisterCategory::Control, "CR0", ["MSW", "CR0", "CR0"], [16, 32, 64]),
    cr("CR2"),
    cr("CR3"),
    cr("CR4"),
    fixed(RegisterCategory::Control, "EFER", "EFER", 64),
    fixed(Fpu, "FPU.st0.fraction", "ST0", 64),
    fixed(Fpu, "FPU.st0.exponent", "ST0.exp", 16),
    fixed(Fpu, "FPU.st1.fraction", "ST1", 64),
    fixed(Fpu, "FPU.st1.exponent", "ST1.exp", 16),
    fixed(Fpu, "FPU.st2.fraction", "ST2", 64),
    fixed(Fpu, "FPU.st2.exponent", "ST2.exp", 16),
    fixed(Fpu, "FPU.st3.fraction", "ST3", 64),
    fixed(Fpu, "FPU.st3.exponent", "ST3.exp", 16),
    fixed(Fpu, "FPU.st4.fraction", "ST4", 64),
    fixed(Fpu, "FPU.st4.exponent", "ST4.exp", 16),
    fixed(Fpu, "FPU.st5.fraction", "ST5", 64),
    fixed(Fpu, "FPU.st5.exponent", "ST5.exp", 16),
    fixed(Fpu, "FPU.st6.fraction", "ST6", 64),
    fixed(Fpu, "FPU.st6.exponent", "ST6.exp", 16),
    fixed(Fpu, "FPU.st7.fraction", "ST7", 64),
    fixed(Fpu, "FPU.st7.exponent", "ST7.exp", 16),
    fixed(Test, "TR3", "TR3", 32),
    fixed(Test, "TR4", "TR4", 32),
    fixed(Test, "TR5", "TR5", 32),
    fixed(Test, "TR6", "TR6", 32),
    fixed(Test, "TR7", "TR7", 32),
    fixed(Sse, "SSE.xmm0.hi", "XMM0.hi", 64),
    fixed(Sse, "SSE.xmm0.lo", "XMM0.lo", 64),
    fixed(Sse, "SSE.xmm1.hi", "XMM1.hi", 64),
    fixed(Sse, "SSE.xmm1.lo", "XMM1.lo", 64),
    fixed(Sse, "SSE.xmm2.hi", "XMM2.hi", 64),
    fixed(Sse, "SSE.xmm2.lo", "XMM2.lo", 64),
    fixed(Sse, "SSE.xmm3.hi", "XMM3.hi", 64),
    fixed(Sse, "SSE.xmm3.lo", "XMM3.lo", 64),
    fixed(Sse, "SSE.xmm4.hi", "XMM4.hi", 64),
    fixed(Sse, "SSE.xmm4.lo", "XMM4.lo", 64),
    fixed(Sse, "SSE.xmm5.hi", "XMM5.hi", 64),
    fixed(Sse, "SSE.xmm5.lo", "XMM5.lo", 64),
    fixed(Sse, "SSE.xmm6.hi", "XMM6.hi", 64),
    fixed(Sse, "SSE.xmm6.lo", "XMM6.lo", 64),
    fixed(Sse, "SSE.xmm7.hi", "XMM7.hi", 64),
    fixed(Sse, "SSE.xmm7.lo", "XMM7.lo", 64),
    dr("DR0"),
    dr("DR1"),
    dr("DR2"),
    dr("DR3"),
    dr("DR6"),
    dr("DR7"),
    by_mode(DescriptorTable, "GDTR.base", ["GDTR.base"; 3], [32, 32, 64]),
    fixed(DescriptorTable, "GDTR.limit", "GDTR.limit", 16),
    by_mode(DescriptorTable, "IDTR.base", ["IDTR.base"; 3], [32, 32, 64]),
    fixed(DescriptorTable, "IDTR.limit", "IDTR.limit", 16),
];

pub const REGISTER_COUNT: usize = 76;

/// Indices into [`REGISTERS`]
pub mod reg {
    pub const RAX: usize = 0;
    pub const RBX: usize = 1;
    pub const RCX: usize = 2;
    pub const RDX: usize = 3;
    pub const RSI: usize = 4;
    pub const RDI: usize = 5;
    pub const RBP: usize = 6;
    pub const RSP: usize = 7;
    pub const R8: usize = 8;
    pub const R15: usize = 15;
    pub const RIP: usize = 16;
    pub const EFLAGS: usize = 17;
    pub const CS: usize = 18;
    pub const DS: usize = 19;
    pub const ES: usize = 20;
    pub const SS: usize = 21;
    pub const FS: usize = 22;
    pub const GS: usize = 23;
    pub const CR0: usize = 24;
    pub const CR2: usize = 25;
    pub const CR3: usize = 26;
    pub const CR4: usize = 27;
    pub const EFER: usize = 28;
    pub const ST0_FRACTION: usize = 29;
    pub const ST0_EXPONENT: usize = 30;
    pub const TR3: usize = 45;
    pub const XMM0_HI: usize = 50;
    pub const DR0: usize = 66;
    pub const DR7: usize = 71;
    pub const GDTR_BASE: usize = 72;
    pub const IDTR_LIMIT: usize = 75;
}

fn width_mask(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Combine a narrow write with the current backing value.
///
/// Widths below 64 bits keep the untouched high-order bits of `backing`.
pub fn merge_partial(backing: u64, value: u64, width: u8) -> u64 {
    let mask = width_mask(width);
    (backing & !mask) | (value & mask)
}

/// Cached state of one register
#[derive(Clone)]
pub struct RegisterInfo {
    /// Bound simulator parameter
    pub param: Option<ParamRef>,
    /// Value at the current width
    pub value: u64,
    /// Display name in the current mode
    pub name: &'static str,
    /// Bit width in the current mode
    pub width: u8,
    /// Bound and present in the current mode
    pub visible: bool,
}

impl RegisterInfo {
    fn unbound(desc: &RegisterDescriptor) -> Self {
        Self {
            param: None,
            value: 0,
            name: desc.names[0],
            width: desc.widths[0],
            visible: false,
        }
    }

    /// Value as hex, zero-padded to the current width
    pub fn format_value(&self) -> String {
        let digits = (self.width as usize).div_ceil(4);
        format!("{:0width$X}", self.value & width_mask(self.width), width = digits)
    }
}

impl fmt::Debug for RegisterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterInfo")
            .field("name", &self.name)
            .field("value", &format_args!("0x{:x}", self.value))
            .field("width", &self.width)
            .field("bound", &self.param.is_some())
            .field("visible", &self.visible)
            .finish()
    }
}

/// Registers and mode of one CPU
#[derive(Debug, Clone)]
pub struct CpuRegisterInfo {
    pub regs: Vec<RegisterInfo>,
    pub mode: CpuMode,
}

impl CpuRegisterInfo {
    pub fn get(&self, regno: usize) -> Option<&RegisterInfo> {
        self.regs.get(regno)
    }

    pub fn value(&self, regno: usize) -> u64 {
        self.regs.get(regno).map_or(0, |r| r.value)
    }

    pub fn is_16bit(&self) -> bool {
        self.mode.code_width() == CodeWidth::Bits16
    }

    pub fn is_32bit(&self) -> bool {
        self.mode.code_width() == CodeWidth::Bits32
    }

    pub fn is_64bit(&self) -> bool {
        self.mode.code_width() == CodeWidth::Bits64
    }

    pub fn paging_enabled(&self) -> bool {
        self.mode.contains(CpuMode::PAGING)
    }
}

/// Register caches of every simulated CPU
#[derive(Debug, Default)]
pub struct SmpInfo {
    cpus: Vec<CpuRegisterInfo>,
}

impl SmpInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every register of every CPU to its simulator parameter.
    ///
    /// Runs once; later calls return `false` and change nothing.
    pub fn init_register_refs<S>(&mut self, sim: &S) -> bool
    where
        S: ParamRegistry + CpuState + ?Sized,
    {
        if !self.cpus.is_empty() {
            return false;
        }

        for cpu in 0..sim.cpu_count() {
            let regs = REGISTERS
                .iter()
                .map(|desc| {
                    let mut info = RegisterInfo::unbound(desc);
                    info.param = sim.get_param_num(desc.param, cpu);
                    if info.param.is_none() {
                        cache_trace!("cpu{}: no parameter for {}", cpu, desc.param);
                    }
                    info
                })
                .collect();
            self.cpus.push(CpuRegisterInfo {
                regs,
                mode: CpuMode::empty(),
            });
        }
        true
    }

    /// Re-read mode and values of `cpu`
    pub fn update_register<S>(&mut self, sim: &S, cpu: usize) -> Result<()>
    where
        S: CpuState + ?Sized,
    {
        if self.cpus.is_empty() {
            return Err(DebugError::NotInitialized);
        }
        let info = self.cpus.get_mut(cpu).ok_or(DebugError::NoSuchCpu(cpu))?;
        let mode = sim.cpu_mode(cpu);
        info.mode = mode;

        for (desc, reg) in REGISTERS.iter().zip(info.regs.iter_mut()) {
            let (name, width) = desc.resolve(mode);
            reg.name = name;
            reg.width = width;
            reg.visible = reg.param.is_some() && (!desc.long_only || mode.is_long());
            reg.value = reg.param.as_ref().map_or(0, |p| p.get64() & width_mask(width));
        }
        cache_trace!("cpu{}: registers refreshed in mode {:?}", cpu, mode);
        Ok(())
    }

    /// Write the cached value of `regno` back to the simulator.
    ///
    /// The width comes from the mode `cpu` is in right now.
    pub fn write_register<S>(&self, sim: &S, cpu: usize, regno: usize) -> Result<()>
    where
        S: CpuState + ?Sized,
    {
        let info = self.cpus.get(cpu).ok_or(DebugError::NoSuchCpu(cpu))?;
        let desc = REGISTERS.get(regno).ok_or(DebugError::NoSuchRegister(regno))?;
        let reg = &info.regs[regno];
        let param = reg.param.as_ref().ok_or(DebugError::Unbound(desc.param))?;

        let (_, width) = desc.resolve(sim.cpu_mode(cpu));
        let new = if width >= 64 {
            reg.value
        } else {
            merge_partial(param.get64(), reg.value, width)
        };
        param.set(new);
        cache_trace!("cpu{}: wrote {} = 0x{:x}", cpu, reg.name, new);
        Ok(())
    }

    /// Update the cached value of `regno` and write it back
    pub fn set_register<S>(&mut self, sim: &S, cpu: usize, regno: usize, value: u64) -> Result<()>
    where
        S: CpuState + ?Sized,
    {
        let info = self.cpus.get_mut(cpu).ok_or(DebugError::NoSuchCpu(cpu))?;
        let reg = info.regs.get_mut(regno).ok_or(DebugError::NoSuchRegister(regno))?;
        reg.value = value & width_mask(reg.width);
        self.write_register(sim, cpu, regno)
    }

    /// Number of CPUs
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Register cache of one CPU
    pub fn cpu(&self, cpu: usize) -> Option<&CpuRegisterInfo> {
        self.cpus.get(cpu)
    }

    /// Indices of registers shown for `cpu` under `config`
    pub fn visible_registers(&self, cpu: usize, config: &DebuggerConfig) -> Vec<usize> {
        let Some(info) = self.cpus.get(cpu) else {
            return Vec::new();
        };
        REGISTERS
            .iter()
            .zip(info.regs.iter())
            .enumerate()
            .filter(|(_, (desc, reg))| reg.visible && desc.category.is_shown(config))
            .map(|(i, _)| i)
            .collect()
    }
}
