//! Worker error types.

use image_tools::ToolError;
use thiserror::Error;

/// Errors raised by the worker core.
///
/// `Topology`, `Connection` and `Config` are fatal and end the process.
/// `Decode` and `Processing` are per-delivery and always end in a nack.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Stream/consumer declaration conflicts with existing broker state.
    #[error("Topology error: {0}")]
    Topology(String),

    /// Broker unreachable or connection lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed request body or missing envelope metadata.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Tool adapter failure or reply encoding failure.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ToolError> for WorkerError {
    fn from(e: ToolError) -> Self {
        WorkerError::Processing(e.to_string())
    }
}
