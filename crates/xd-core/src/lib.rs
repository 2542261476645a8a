//! Core support for the x86dbg debugger
//!
//! This crate provides the pieces shared by every debugger component:
//! - Persisted debugger configuration (line-record settings file)
//! - Error types
//! - Logging setup and per-component logging macros

pub mod config;
pub mod error;
pub mod logging;

pub use config::{DebuggerConfig, LogLevel};
pub use error::{ConfigError, Result};
