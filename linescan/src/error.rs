/*!
Error types for the line-scan device protocol layer.

Every component returns its own error enum; [`DeviceError`] aggregates them so
callers of a [`crate::DeviceSession`] can match on the failing component.
*/

use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

/// Result type returned by [`crate::DeviceSession`] operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Frame decoding errors
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Buffer shorter than `2 * pixel_count`
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// Frame file could not be read
    #[error("Failed to read frame file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// CCF (camera configuration file) errors
#[derive(Error, Debug)]
pub enum CcfError {
    #[error("Failed to read CCF file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CCF has no '{key}' entry")]
    MissingKey { key: &'static str },

    #[error("Malformed pixel count '{value}' in CCF")]
    Malformed { value: String },
}

/// Serial command channel errors
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Serial port is not open")]
    NotOpen,

    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to close serial port {port}: {reason}")]
    Close { port: String, reason: String },

    #[error("Failed to write command '{command}': {source}")]
    Write {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read response to '{command}': {source}")]
    Read {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No response to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Command '{command}' rejected, response {response:?}")]
    CommandRejected { command: String, response: String },
}

/// Grab console pipe handshake errors
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("Failed to start grab console {executable}: {source}")]
    ProcessSpawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Handshake desync at {step}: {reason}")]
    ProtocolDesync { step: &'static str, reason: String },

    #[error("No line from grab console at {step} within {waited:?}")]
    Timeout { step: &'static str, waited: Duration },

    #[error("Failed to write to grab console at {step}: {source}")]
    Write {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame retrieval failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Pipe is closed")]
    Closed,
}

/// Reference waveform loading errors
#[derive(Error, Debug)]
pub enum WaveformError {
    #[error("Failed to read waveform {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid CSV in waveform: {0}")]
    Csv(#[from] csv::Error),

    #[error("Non-numeric value '{value}' in waveform")]
    NotNumeric { value: String },

    #[error("Waveform contains no samples")]
    Empty,
}

/// Errors surfaced by [`crate::DeviceSession`] operations
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),

    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] CcfError),

    #[error("Waveform error: {0}")]
    Waveform(#[from] WaveformError),

    /// Operation issued while the session is not `Ready`
    #[error("Session is not ready (state: {state:?})")]
    NotReady { state: SessionState },

    /// Operation the backend has no channel for
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Create a new unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}
