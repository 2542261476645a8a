//! Debugger error types

use thiserror::Error;

use crate::breakpoint::BreakpointError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebugError {
    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),

    #[error("No such CPU: {0}")]
    NoSuchCpu(usize),

    #[error("No such register: {0}")]
    NoSuchRegister(usize),

    #[error("Register {0} is not bound to a simulator parameter")]
    Unbound(&'static str),

    #[error("Register references have not been bound")]
    NotInitialized,

    #[error("Failed to read {len} bytes at linear 0x{addr:016x}")]
    ReadFailed { addr: u64, len: usize },

    #[error("Failed to write at linear 0x{addr:016x}")]
    WriteFailed { addr: u64 },

    #[error("Selector {selector:04x} has no valid descriptor")]
    BadSelector { selector: u16 },

    #[error("Offset 0x{offset:x} is outside the limit of selector {selector:04x}")]
    SegmentLimit { selector: u16, offset: u64 },
}

pub type Result<T> = std::result::Result<T, DebugError>;
