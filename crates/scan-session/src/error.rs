//! Scan Session Errors

use crate::manager::ScanState;
use obd_protocol::ObdError;
use thiserror::Error;

/// Errors returned synchronously by session-level operations
#[derive(Debug, Error)]
pub enum ScanError {
    /// Research mode is on and the consent oracle said no
    #[error("Data collection consent is required to start a research scan")]
    ConsentRequired,

    /// A scan session is already running
    #[error("A scan session is already active")]
    SessionActive,

    /// Operation needs a discovered, connected vehicle
    #[error("Not connected to a vehicle (state: {0:?})")]
    NotConnected(ScanState),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol-level failure
    #[error(transparent)]
    Protocol(#[from] ObdError),
}

impl From<config::ConfigError> for ScanError {
    fn from(err: config::ConfigError) -> Self {
        ScanError::Config(err.to_string())
    }
}
