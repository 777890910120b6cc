//! Error types for fsrlink-store.

use std::path::PathBuf;

/// Result type for fsrlink-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fsrlink-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored record list could not be encoded or decoded.
    #[error("Serialization error for {key}: {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },

    /// The database was written by a newer version of fsrlink.
    #[error("Unsupported schema version {found} (newest known is {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },
}
