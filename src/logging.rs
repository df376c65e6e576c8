//! Logging sink handed to the batch orchestrator.
//!
//! The orchestrator never looks up a global logger; callers construct a sink
//! and pass it in. `TracingSink` forwards to `tracing`.

use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(label)
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, level: LogLevel);
}

/// Sink that forwards every message to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Info => info!(target: "file_cipher::batch", "{message}"),
            LogLevel::Warning => warn!(target: "file_cipher::batch", "{message}"),
            LogLevel::Error => error!(target: "file_cipher::batch", "{message}"),
        }
    }
}
