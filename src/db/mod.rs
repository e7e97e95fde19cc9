//! Database layer for track-dl
//!
//! SQLite persistence for the queue state, usable as a
//! [`StateStore`](crate::persistence::StateStore).
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Job rows and queue settings, whole-state load/save

use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::error::DatabaseError;
use crate::types::{Job, JobId, Status};

mod jobs;
mod migrations;

/// Job record as stored in the `jobs` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    /// Job ID
    pub id: i64,
    /// Upstream track reference
    pub source_ref: String,
    /// Display name
    pub name: Option<String>,
    /// Metadata map encoded as JSON
    pub metadata: String,
    /// Status code (see [`Status::to_i32`])
    pub status: i32,
    /// Position within the status collection
    pub position: i64,
    /// Progress percentage
    pub progress: i64,
    /// Failure reason
    pub error: Option<String>,
    /// Artifact name
    pub artifact: Option<String>,
    /// Artifact location
    pub location: Option<String>,
    /// Unix timestamp in milliseconds when the job was queued
    pub added_at: i64,
    /// Unix timestamp in milliseconds when the job was admitted
    pub started_at: Option<i64>,
    /// Unix timestamp in milliseconds when the job completed
    pub completed_at: Option<i64>,
    /// Unix timestamp in milliseconds when the job failed
    pub failed_at: Option<i64>,
}

fn from_millis(id: i64, millis: i64) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        DatabaseError::CorruptRecord(format!("job {} has invalid timestamp {}", id, millis))
    })
}

fn from_millis_opt(id: i64, millis: Option<i64>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    millis.map(|m| from_millis(id, m)).transpose()
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = Status::from_i32(row.status).ok_or_else(|| {
            DatabaseError::CorruptRecord(format!("job {} has unknown status {}", row.id, row.status))
        })?;
        let metadata = serde_json::from_str(&row.metadata).map_err(|e| {
            DatabaseError::CorruptRecord(format!("job {} has invalid metadata: {}", row.id, e))
        })?;

        Ok(Job {
            id: JobId(row.id),
            source_ref: row.source_ref,
            name: row.name,
            metadata,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            error: row.error,
            added_at: from_millis(row.id, row.added_at)?,
            started_at: from_millis_opt(row.id, row.started_at)?,
            completed_at: from_millis_opt(row.id, row.completed_at)?,
            failed_at: from_millis_opt(row.id, row.failed_at)?,
            artifact: row.artifact,
            location: row.location,
        })
    }
}

/// Database handle for track-dl
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}
