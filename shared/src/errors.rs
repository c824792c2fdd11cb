//! Shared error types for the cluster test harness

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Malformed frame: {message}")]
    FrameError { message: String },

    #[error("Frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("Reply {response_to} does not answer request {request_id}")]
    MismatchedReply { request_id: i32, response_to: i32 },

    #[error("Connection to {address} closed")]
    ConnectionClosed { address: String },

    #[error("Unable to connect to {address}: {message}")]
    ConnectFailed { address: String, message: String },

    #[error("Operation against {address} timed out after {timeout:?}")]
    OperationTimeout { address: String, timeout: Duration },

    #[error("Failed to spawn {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("No program registered on port {port}")]
    UnknownProgram { port: u16 },

    #[error("Program on port {port} still running {waited:?} after SIGKILL")]
    ProgramWouldNotDie { port: u16, waited: Duration },

    #[error("No free port left in range starting at {base}")]
    PortsExhausted { base: u16 },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(unix)]
    #[error("Signal delivery failed: {0}")]
    Signal(#[from] nix::Error),
}

impl SharedError {
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::FrameError { message: message.into() }
    }

    pub fn closed<S: ToString>(address: S) -> Self {
        Self::ConnectionClosed { address: address.to_string() }
    }

    /// True when the peer went away, either by a clean close or a reset
    pub fn is_disconnect(&self) -> bool {
        match self {
            SharedError::ConnectionClosed { .. } => true,
            SharedError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
