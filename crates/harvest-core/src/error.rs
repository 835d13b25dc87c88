//! Error types for harvest-core

use thiserror::Error;

use crate::queue::ScanRejection;
use crate::remote::RemoteError;

/// Result type alias using harvest-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in harvest-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local store has no room left; the write was not recorded.
    #[error("Local storage is full, the record was not saved: {0}")]
    StorageExhausted(String),

    /// A bucket scan failed local validation and never entered the queue.
    #[error("Scan rejected: {0}")]
    ScanRejected(#[from] ScanRejection),

    /// Remote data service error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Another writer changed the harvest settings first.
    #[error("Harvest settings were changed by someone else; reloaded the latest values for orchard {0}")]
    SettingsConflict(String),
}

impl Error {
    /// Whether the underlying `SQLite` failure means the device is out of space.
    pub(crate) fn is_storage_full(&self) -> bool {
        let message = self.to_string().to_ascii_lowercase();
        message.contains("database or disk is full")
            || message.contains("disk is full")
            || message.contains("quota")
    }
}
