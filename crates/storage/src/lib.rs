//! Storage Layer
//!
//! Keeps readings and scan sessions in memory behind the repository
//! pattern, and plugs into the scan engine as its [`scan_session::ScanStore`].

mod repository;

pub use repository::{Repository, SessionExport, DEFAULT_MAX_READINGS};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Lock poisoned: {0}")]
    LockError(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
