//! Error types for configuration handling

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or saving a debugger configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unrecognized configuration header: {0:?}")]
    InvalidHeader(String),
    #[error("Configuration file is empty")]
    Empty,
    #[error("No configuration directory available on this platform")]
    NoConfigDir,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
