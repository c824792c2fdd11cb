//! Bridge error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// A control command was not acknowledged; the edge state is unknown
    #[error("Bridge on port {port} failed to apply {command} for host {host}: {message}")]
    ConfigurationFailure {
        port: u16,
        command: String,
        host: String,
        message: String,
    },

    #[error("Bridge on port {port} exited with code {exit_code} before accepting connections")]
    FailedToStart { port: u16, exit_code: i32 },

    #[error("Bridge on port {port} did not accept connections within {timeout:?}")]
    ActivationTimeout { port: u16, timeout: Duration },

    #[error("Bridge on port {port} has not been activated")]
    NotActivated { port: u16 },

    #[error("Bridge requires a destination host:port")]
    MissingDestination,

    #[error("Invalid bridge option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Shared error: {0}")]
    SharedError(#[from] SharedError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BridgeError {
    pub fn invalid_option<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
