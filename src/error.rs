//! Custom error types for the daemon.
//!
//! `CapError` consolidates every failure family the daemon deals with:
//! configuration loading, file and network I/O, driver reads, broker
//! connectivity and the control-plane conflict/not-found results that are
//! surfaced to callers rather than logged. `#[from]` conversions keep `?`
//! usable throughout the application layer.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, CapError>;

#[derive(Error, Debug)]
pub enum CapError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sample source error: {0}")]
    Source(String),

    #[error("Shared slot lock wait exceeded {0:?}")]
    SlotLockTimeout(Duration),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Broker protocol violation: {0}")]
    Protocol(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("Streaming already enabled")]
    AlreadyStreaming,

    #[error("Streaming is not enabled")]
    NotStreaming,

    #[error("A stream client is already attached")]
    ClientAttached,

    #[error("No capture file is open")]
    NoOpenCapture,

    #[error("Capture '{0}' not found")]
    CaptureNotFound(String),
}

impl CapError {
    /// Whether this error maps to a control-plane 409 Conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CapError::AlreadyRecording | CapError::AlreadyStreaming | CapError::ClientAttached
        )
    }

    /// Whether this error maps to a control-plane 404 Not Found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CapError::CaptureNotFound(_) | CapError::NotStreaming)
    }
}
