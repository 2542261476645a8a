//! Disassembly cache
//!
//! A window of guest code is read in one go and decoded into a fixed number of
//! lines. Raw bytes and decoded text live in two shared buffers; each line
//! records its spans into them.

use std::ops::Range;

use xd_core::cache_trace;

use crate::error::{DebugError, Result};
use crate::simulator::{CpuMode, Decoder, GuestMemory, Syntax};

/// Bytes read per disassembly window
pub const DISASM_WINDOW: usize = 1024;

/// Lines decoded per window
pub const DISASM_LINES: usize = 48;

/// Where a disassembly window starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisasmOrigin {
    /// Linear start address
    pub linear: u64,
    /// `selector:offset` of the start, for segment-relative display
    pub segment: Option<(u16, u64)>,
}

impl DisasmOrigin {
    pub fn linear(linear: u64) -> Self {
        Self { linear, segment: None }
    }

    pub fn segmented(linear: u64, selector: u16, offset: u64) -> Self {
        Self {
            linear,
            segment: Some((selector, offset)),
        }
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisasmLine {
    /// Linear address
    pub linear: u64,
    /// `selector:offset`, when disassembling segment-relative
    pub segment: Option<(u16, u64)>,
    /// Instruction length in bytes
    pub len: usize,
    /// Span in the raw byte buffer
    pub bytes: Range<usize>,
    /// Span in the text buffer
    pub text: Range<usize>,
}

/// Decoded window of guest code
#[derive(Debug, Default)]
pub struct DisassemblyCache {
    cpu: usize,
    raw: Vec<u8>,
    text: String,
    lines: Vec<DisasmLine>,
}

impl DisassemblyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the line table starting at `origin`.
    ///
    /// Fails without touching the current table when guest memory cannot be
    /// read.
    pub fn disassemble<S>(
        &mut self,
        sim: &S,
        cpu: usize,
        mode: CpuMode,
        origin: DisasmOrigin,
        syntax: Syntax,
    ) -> Result<()>
    where
        S: GuestMemory + Decoder + ?Sized,
    {
        let mut raw = vec![0u8; DISASM_WINDOW];
        if !sim.read_linear(cpu, origin.linear, &mut raw) {
            return Err(DebugError::ReadFailed {
                addr: origin.linear,
                len: DISASM_WINDOW,
            });
        }

        let width = mode.code_width();
        let mut text = String::new();
        let mut lines = Vec::with_capacity(DISASM_LINES);
        let mut cursor = 0usize;
        let mut linear = origin.linear;
        let mut segment = origin.segment;
        let mut seg_base = origin
            .segment
            .map_or(0, |(_, offset)| origin.linear.wrapping_sub(offset));

        while lines.len() < DISASM_LINES && cursor < raw.len() {
            let addr = segment.map_or(linear, |(_, offset)| offset);
            let decoded = sim.decode(&raw[cursor..], width, seg_base, addr, syntax);
            if decoded.len == 0 || cursor + decoded.len > raw.len() {
                break;
            }

            let text_start = text.len();
            text.push_str(&decoded.text);
            lines.push(DisasmLine {
                linear,
                segment,
                len: decoded.len,
                bytes: cursor..cursor + decoded.len,
                text: text_start..text.len(),
            });

            cursor += decoded.len;
            linear = linear.wrapping_add(decoded.len as u64);
            if let Some((selector, offset)) = segment.as_mut() {
                *offset = offset.wrapping_add(decoded.len as u64);
                // 16-bit offsets wrap into the next paragraph-aligned segment
                if !mode.is_protected() && *offset > 0xFFFF {
                    *offset -= 0x1_0000;
                    *selector = selector.wrapping_add(0x1000);
                    seg_base = seg_base.wrapping_add(0x1_0000);
                }
            }
        }

        raw.truncate(cursor);
        self.cpu = cpu;
        self.raw = raw;
        self.text = text;
        self.lines = lines;
        cache_trace!(
            "cpu{}: disassembled {} lines at 0x{:x}",
            cpu,
            self.lines.len(),
            origin.linear
        );
        Ok(())
    }

    /// Whether `linear` lies outside the cached window of `cpu`
    pub fn must_disassemble(&self, cpu: usize, linear: u64) -> bool {
        match self.covered_range() {
            Some((first, last)) => cpu != self.cpu || linear < first || linear > last,
            None => true,
        }
    }

    /// Linear addresses of the first and last cached line
    pub fn covered_range(&self) -> Option<(u64, u64)> {
        let first = self.lines.first()?;
        let last = self.lines.last()?;
        Some((first.linear, last.linear))
    }

    /// Index of the line that starts at `linear`
    pub fn line_at(&self, linear: u64) -> Option<usize> {
        self.lines.iter().position(|line| line.linear == linear)
    }

    pub fn lines(&self) -> &[DisasmLine] {
        &self.lines
    }

    pub fn line_bytes(&self, line: &DisasmLine) -> &[u8] {
        &self.raw[line.bytes.clone()]
    }

    pub fn line_text(&self, line: &DisasmLine) -> &str {
        &self.text[line.text.clone()]
    }

    /// CPU the cached window belongs to
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSim;

    fn filled(len: usize) -> MockSim {
        let sim = MockSim::new(1);
        // every byte decodes as a one byte "nop" in the mock decoder
        sim.write_mem(0, &vec![0x90; len]);
        sim
    }

    #[test]
    fn test_line_table_and_buffers() {
        let sim = MockSim::new(1);
        // mock decoder: opcode byte gives the length, 0x90 -> 1
        sim.write_mem(0x7C00, &[0x03, 0xAA, 0xBB, 0x90, 0x02, 0xCC]);
        let mut cache = DisassemblyCache::new();
        cache
            .disassemble(&sim, 0, CpuMode::empty(), DisasmOrigin::linear(0x7C00), Syntax::Intel)
            .unwrap();

        // unwritten memory reads as 0x00, which ends the window
        let lines = cache.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].linear, 0x7C00);
        assert_eq!(lines[0].len, 3);
        assert_eq!(cache.line_bytes(&lines[0]), &[0x03, 0xAA, 0xBB]);
        assert_eq!(cache.line_text(&lines[0]), "op03 @7c00");
        assert_eq!(lines[1].linear, 0x7C03);
        assert_eq!(cache.line_text(&lines[1]), "nop @7c03");
        assert_eq!(lines[2].linear, 0x7C04);
        assert_eq!(cache.line_bytes(&lines[2]), &[0x02, 0xCC]);
        assert_eq!(cache.line_at(0x7C04), Some(2));
        assert_eq!(cache.line_at(0x7C05), None);
    }

    #[test]
    fn test_must_disassemble_tracks_covered_range() {
        let sim = filled(0x2000);
        let mut cache = DisassemblyCache::new();
        assert!(cache.must_disassemble(0, 0));

        cache
            .disassemble(&sim, 0, CpuMode::empty(), DisasmOrigin::linear(0x100), Syntax::Intel)
            .unwrap();
        let (first, last) = cache.covered_range().unwrap();
        assert_eq!((first, last), (0x100, 0x100 + DISASM_LINES as u64 - 1));

        assert!(!cache.must_disassemble(0, first));
        assert!(!cache.must_disassemble(0, first + 10));
        assert!(!cache.must_disassemble(0, last));
        assert!(cache.must_disassemble(0, first - 1));
        assert!(cache.must_disassemble(0, last + 1));
        assert!(cache.must_disassemble(1, first));
    }

    #[test]
    fn test_read_failure_keeps_previous_table() {
        let sim = filled(0x1000);
        let mut cache = DisassemblyCache::new();
        cache
            .disassemble(&sim, 0, CpuMode::empty(), DisasmOrigin::linear(0x10), Syntax::Att)
            .unwrap();
        let before = cache.lines().to_vec();

        sim.fail_reads_at(0x9000);
        let err = cache
            .disassemble(&sim, 0, CpuMode::empty(), DisasmOrigin::linear(0x9000), Syntax::Intel)
            .unwrap_err();
        assert_eq!(err, DebugError::ReadFailed { addr: 0x9000, len: DISASM_WINDOW });
        assert_eq!(cache.lines(), &before[..]);
        assert_eq!(cache.line_text(&cache.lines()[0]), "nop @10 (att)");
    }

    #[test]
    fn test_segment_offset_rolls_over_in_real_mode() {
        let sim = filled(0x30000);
        let mut cache = DisassemblyCache::new();
        let origin = DisasmOrigin::segmented(0x1000 * 16 + 0xFFFE, 0x1000, 0xFFFE);
        cache
            .disassemble(&sim, 0, CpuMode::empty(), origin, Syntax::Intel)
            .unwrap();

        let lines = cache.lines();
        assert_eq!(lines[0].segment, Some((0x1000, 0xFFFE)));
        assert_eq!(lines[1].segment, Some((0x1000, 0xFFFF)));
        assert_eq!(lines[2].segment, Some((0x2000, 0x0000)));
        assert_eq!(lines[2].linear, 0x2_0000);
        // decoder sees the offset, not the linear address
        assert_eq!(cache.line_text(&lines[2]), "nop @0");
    }

    #[test]
    fn test_segment_offset_does_not_roll_in_protected_mode() {
        let sim = filled(0x30000);
        let mut cache = DisassemblyCache::new();
        let origin = DisasmOrigin::segmented(0x1FFFE, 0x08, 0xFFFE);
        cache
            .disassemble(&sim, 0, CpuMode::PROTECTED | CpuMode::CODE32, origin, Syntax::Intel)
            .unwrap();
        assert_eq!(cache.lines()[2].segment, Some((0x08, 0x1_0000)));
    }

    #[test]
    fn test_long_mode_offset_wraps_at_top_of_address_space() {
        let sim = filled(0x1000);
        let mut cache = DisassemblyCache::new();
        let origin = DisasmOrigin::segmented(0x100, 0x08, u64::MAX - 2);
        cache
            .disassemble(&sim, 0, CpuMode::PROTECTED | CpuMode::CODE64, origin, Syntax::Intel)
            .unwrap();

        let lines = cache.lines();
        assert_eq!(lines.len(), DISASM_LINES);
        assert_eq!(lines[2].segment, Some((0x08, u64::MAX)));
        assert_eq!(lines[3].segment, Some((0x08, 0)));
        assert_eq!(lines[3].linear, 0x103);
        assert_eq!(cache.line_text(&lines[3]), "nop @0");
    }

    #[test]
    fn test_zero_length_decode_stops_window() {
        let sim = MockSim::new(1);
        // 0x00 is "undecodable" in the mock decoder
        sim.write_mem(0x500, &[0x90, 0x90, 0x00]);
        let mut cache = DisassemblyCache::new();
        cache
            .disassemble(&sim, 0, CpuMode::empty(), DisasmOrigin::linear(0x500), Syntax::Intel)
            .unwrap();
        assert_eq!(cache.lines().len(), 2);
    }
}
