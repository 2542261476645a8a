//! Logging infrastructure for the debugger

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{DebuggerConfig, LogLevel};

fn to_level(level: LogLevel) -> Option<Level> {
    match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    }
}

/// Initialize the logging system based on configuration
pub fn init(config: &DebuggerConfig) {
    let Some(level) = to_level(config.log_level) else {
        return;
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true),
    );

    match config.log_path.as_ref() {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => {
                let file_layer = fmt::layer().with_writer(file).with_ansi(false);
                let _ = subscriber.with(file_layer).try_init();
            }
            Err(e) => {
                let _ = subscriber.try_init();
                tracing::warn!("Could not open log file {}: {}", path.display(), e);
            }
        },
        None => {
            let _ = subscriber.try_init();
        }
    }
}

/// Initialize logging with default settings (for tools and tests)
pub fn init_default() {
    let filter = EnvFilter::from_default_env()
        .add_directive(Level::INFO.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

// Convenience macros for component-specific logging

/// Log a command queue trace message
#[macro_export]
macro_rules! queue_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "queue", $($arg)*)
    };
}

/// Log a session debug message
#[macro_export]
macro_rules! session_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "session", $($arg)*)
    };
}

/// Log a breakpoint debug message
#[macro_export]
macro_rules! bp_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "breakpoint", $($arg)*)
    };
}

/// Log an inspection cache trace message
#[macro_export]
macro_rules! cache_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "cache", $($arg)*)
    };
}
