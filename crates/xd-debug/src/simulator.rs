//! Interfaces the debugger consumes from the simulator and the control surface
//!
//! The debugger never owns CPU state, guest memory or the instruction decoder.
//! It reaches them through the traits below, which a simulator implements once
//! and hands to [`DebugSession`](crate::DebugSession).

use std::sync::Arc;

use bitflags::bitflags;

use crate::breakpoint::{BreakpointHandle, BreakpointLocation};

bitflags! {
    /// Execution mode of a simulated CPU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuMode: u8 {
        /// CR0.PE set
        const PROTECTED = 0x01;
        /// CR0.PG set
        const PAGING = 0x02;
        /// Current code segment is 32-bit
        const CODE32 = 0x04;
        /// Current code segment is 64-bit (long mode)
        const CODE64 = 0x08;
    }
}

/// Effective operand width of the code currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CodeWidth {
    Bits16,
    Bits32,
    Bits64,
}

impl CpuMode {
    pub fn code_width(&self) -> CodeWidth {
        if self.contains(Self::CODE64) {
            CodeWidth::Bits64
        } else if self.contains(Self::CODE32) {
            CodeWidth::Bits32
        } else {
            CodeWidth::Bits16
        }
    }

    pub fn is_protected(&self) -> bool {
        self.contains(Self::PROTECTED)
    }

    pub fn is_long(&self) -> bool {
        self.contains(Self::CODE64)
    }
}

/// Segment registers addressable by the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegReg {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

/// Protected-mode segment descriptor, as far as the debugger needs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentDescriptor {
    /// Segment base address
    pub base: u64,
    /// Effective limit in bytes (granularity already applied)
    pub limit: u32,
    /// Expand-down data segment
    pub expand_down: bool,
    /// D/B bit: 32-bit segment
    pub big: bool,
}

/// Assembler syntax for decoded text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    #[default]
    Intel,
    Att,
}

/// Result of decoding one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Instruction length in bytes
    pub len: usize,
    /// Disassembled text
    pub text: String,
}

/// A bound, numeric simulator parameter (one register)
pub trait NumericParam: Send + Sync {
    fn get64(&self) -> u64;
    fn set(&self, value: u64);
}

pub type ParamRef = Arc<dyn NumericParam>;

/// Named-parameter registry
pub trait ParamRegistry {
    /// Look up a register parameter by name within the scope of one CPU
    fn get_param_num(&self, name: &str, cpu: usize) -> Option<ParamRef>;
}

/// Per-CPU execution state
pub trait CpuState {
    /// Number of simulated CPUs
    fn cpu_count(&self) -> usize;
    /// Current execution mode of `cpu`
    fn cpu_mode(&self, cpu: usize) -> CpuMode;
}

/// Guest memory access
pub trait GuestMemory {
    /// Read `buf.len()` bytes at a linear address. Returns `false` on failure.
    fn read_linear(&self, cpu: usize, addr: u64, buf: &mut [u8]) -> bool;
    /// Write `buf` at a linear address. Returns `false` on failure.
    fn write_linear(&self, cpu: usize, addr: u64, buf: &[u8]) -> bool;
    /// Linear address of `offset` within the segment currently loaded in `seg`
    fn get_laddr(&self, cpu: usize, seg: SegReg, offset: u64) -> u64;
    /// Descriptor-table lookup for `selector`
    fn descriptor(&self, cpu: usize, selector: u16) -> Option<SegmentDescriptor>;
}

/// Instruction decoder
pub trait Decoder {
    fn decode(
        &self,
        bytes: &[u8],
        width: CodeWidth,
        seg_base: u64,
        addr: u64,
        syntax: Syntax,
    ) -> DecodedInstruction;
}

/// Execution control
pub trait RunControl {
    /// Run until a stop condition. `boundary` is called at each instruction
    /// boundary with the executing CPU; returning `true` stops the run.
    /// Returns the CPU that stopped.
    fn continue_execution(&self, boundary: &mut dyn FnMut(usize) -> bool) -> usize;
    /// Execute `count` instructions on one CPU, or on all CPUs when `cpu` is
    /// `None`. Returns the CPU that executed last.
    fn step_n(&self, cpu: Option<usize>, count: u32) -> usize;
    /// Step over the next instruction of `cpu` (calls run to completion)
    fn step_over(&self, cpu: usize) -> usize;
}

/// Watchpoint access type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Read,
    Write,
}

/// External breakpoint and watchpoint primitive
pub trait BreakpointBackend {
    /// Install a breakpoint. Returns `-1` on failure.
    fn set_breakpoint(&self, location: &BreakpointLocation, condition: Option<&str>) -> BreakpointHandle;
    fn enable_breakpoint(&self, handle: BreakpointHandle, enable: bool) -> bool;
    fn delete_breakpoint(&self, handle: BreakpointHandle) -> bool;
    fn set_watchpoint(&self, kind: WatchKind, addr: u64, len: u32) -> bool;
    fn delete_watchpoint(&self, addr: u64) -> bool;
}

/// Everything the session needs from the simulator
pub trait Simulator:
    ParamRegistry + CpuState + GuestMemory + Decoder + RunControl + BreakpointBackend + Send + Sync
{
}

impl<T> Simulator for T where
    T: ParamRegistry + CpuState + GuestMemory + Decoder + RunControl + BreakpointBackend + Send + Sync
{
}

/// Control surface notification hook
pub trait DebugFrontend: Send + Sync {
    /// Called on the simulation thread once a command has completed and the
    /// inspection caches for `cpu` have been refreshed. Returning `true`
    /// hands control back to the debugger prompt.
    fn command_finished(&self, cpu: usize) -> bool;
}
