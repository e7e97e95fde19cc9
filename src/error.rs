//! Error types for track-dl
//!
//! Transfer failures are not errors in this crate: they are recorded on the job
//! record and surface through [`Status::Failed`](crate::types::Status::Failed).
//! The types here cover what a *caller* can get back from a queue operation,
//! configuration problems, and persistence failures.

use thiserror::Error;

use crate::types::{JobId, Status};

/// Result type alias for track-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for track-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The job is not in the collection the operation expected it in
    ///
    /// Returned when a job vanished between a snapshot and a transition (an
    /// admission race), or when a caller addresses a job in the wrong state
    /// (e.g. retrying a job that is not failed).
    #[error("job {id} not found in {expected} jobs")]
    NotFound {
        /// The job that was addressed
        id: JobId,
        /// The collection the job was expected to be in
        expected: Status,
    },

    /// Another job already covers the same upstream track
    #[error("duplicate job for source {0}")]
    Duplicate(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - no new work is accepted
    #[error("shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Create a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error means "the job was not where we looked for it"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be mapped back to a job
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}
