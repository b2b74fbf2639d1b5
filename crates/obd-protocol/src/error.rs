//! OBD-II Error Types

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum ObdError {
    /// Serial port connection error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Link is not connected, nothing was written
    #[error("OBD link is not connected")]
    LinkUnavailable,

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    CommandTimeout(u64),

    /// Response carried no decodable hex payload
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Parameter code is not in the registry
    #[error("Unknown parameter code {0}")]
    UnknownParameter(String),

    /// Adapter rejected every configuration command
    #[error("Vehicle discovery failed: {0}")]
    DiscoveryFailed(String),
}

impl ObdError {
    /// Whether the error came from the command channel rather than decoding
    pub fn is_channel_error(&self) -> bool {
        matches!(self, ObdError::LinkUnavailable | ObdError::CommandTimeout(_))
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
