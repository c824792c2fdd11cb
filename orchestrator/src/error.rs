//! Orchestrator-specific error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Process on port {port} neither accepted a connection nor exited within {timeout:?}")]
    StartupTimeout { port: u16, timeout: Duration },

    #[error("Process on port {port} stopped with exit code {actual}, expected {expected}")]
    UnexpectedExitCode { port: u16, expected: i32, actual: i32 },

    #[error("Cannot compare non-equal non-numeric versions: {left} and {right}")]
    AmbiguousVersionComparison { left: String, right: String },

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("No saved options for run {run_id}")]
    UnknownRunId { run_id: String },

    #[error("No process known on port {port}")]
    UnknownPort { port: u16 },

    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Validation before stopping port {port} failed: {message}")]
    ValidationFailed { port: u16, message: String },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn config<S: Into<String>>(field: S) -> Self {
        Self::ConfigurationError { field: field.into() }
    }

    pub fn invalid_option<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Exit code observed by a failed stop
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            OrchestratorError::UnexpectedExitCode { actual, .. } => Some(*actual),
            _ => None,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
