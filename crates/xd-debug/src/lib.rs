//! Debugger core for the x86dbg CPU simulator debugger
//!
//! This crate provides:
//! - The command queue between the control surface and the simulation thread
//! - Linear, virtual and physical breakpoints
//! - Per-CPU register caches with mode-dependent names and widths
//! - Disassembly, memory and stack inspection caches
//! - [`DebugSession`], which owns all of the above for one simulator

pub mod breakpoint;
pub mod command;
pub mod disassembler;
pub mod error;
pub mod memory;
pub mod registers;
pub mod session;
pub mod simulator;
pub mod stack;

#[cfg(test)]
mod testing;

pub use breakpoint::{Breakpoint, BreakpointHandle, BreakpointKind, BreakpointLocation, BreakpointRegistry};
pub use command::{CommandQueue, DebugCommand};
pub use disassembler::{DisasmLine, DisassemblyCache};
pub use error::{DebugError, Result};
pub use memory::MemoryDump;
pub use registers::{reg, CpuRegisterInfo, RegisterInfo, SmpInfo, REGISTERS};
pub use session::{DebugSession, FetchOutcome};
pub use simulator::{DebugFrontend, Simulator};
pub use stack::{StackEntry, StackSnapshot};
