//! Core types for track-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a queued job
///
/// Allocated by the queue store at enqueue time. It is never reused and is
/// independent of the upstream track reference, so the same track can be
/// downloaded again after its previous job failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job status
///
/// Each status corresponds to exactly one ordered collection in the queue store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for a free download slot
    Queued,
    /// Admitted and handed to the transfer executor
    Downloading,
    /// Transfer finished successfully
    Completed,
    /// Transfer failed or was cancelled
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            0 => Some(Status::Queued),
            1 => Some(Status::Downloading),
            2 => Some(Status::Completed),
            3 => Some(Status::Failed),
            _ => None,
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Queued => 0,
            Status::Downloading => 1,
            Status::Completed => 2,
            Status::Failed => 3,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Downloading => "downloading",
            Status::Completed => "completed",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Audio quality requested from the transfer executor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    /// Compressed, low bitrate
    Low,
    /// Compressed, high bitrate
    High,
    /// CD quality lossless
    #[default]
    Lossless,
    /// High resolution lossless
    HiResLossless,
}

impl Quality {
    /// The upstream name of this quality level
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "LOW",
            Quality::High => "HIGH",
            Quality::Lossless => "LOSSLESS",
            Quality::HiResLossless => "HI_RES_LOSSLESS",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Quality {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Quality::Low),
            "HIGH" => Ok(Quality::High),
            "LOSSLESS" => Ok(Quality::Lossless),
            "HI_RES_LOSSLESS" => Ok(Quality::HiResLossless),
            other => Err(crate::error::Error::config(
                "quality",
                format!("unknown quality '{}'", other),
            )),
        }
    }
}

/// Input for [`TrackDownloader::enqueue`](crate::TrackDownloader::enqueue)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Upstream track reference, used for duplicate detection
    pub source_ref: String,
    /// Display name (track title)
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form metadata passed through to the executor
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NewJob {
    /// Create a job input for an upstream track
    pub fn new(source_ref: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            ..Default::default()
        }
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A job record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Upstream track reference
    pub source_ref: String,
    /// Display name (track title)
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Current status
    pub status: Status,
    /// Progress percentage (0 to 100)
    pub progress: u8,
    /// Failure reason, set only while failed
    #[serde(default)]
    pub error: Option<String>,
    /// When the job entered the queue (reset on retry)
    pub added_at: DateTime<Utc>,
    /// When the job was admitted
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job completed
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job failed
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Artifact name reported by the executor (e.g. a filename)
    #[serde(default)]
    pub artifact: Option<String>,
    /// Optional artifact location reported by the executor
    #[serde(default)]
    pub location: Option<String>,
}

impl Job {
    /// Build a freshly queued job from caller input
    pub(crate) fn queued(id: JobId, input: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source_ref: input.source_ref,
            name: input.name,
            metadata: input.metadata,
            status: Status::Queued,
            progress: 0,
            error: None,
            added_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            artifact: None,
            location: None,
        }
    }

    /// Display name, falling back to the source reference
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source_ref)
    }
}

/// Job counts per status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for a slot
    pub queued: usize,
    /// Jobs currently transferring
    pub downloading: usize,
    /// Completed jobs
    pub completed: usize,
    /// Failed jobs
    pub failed: usize,
    /// Sum of all four
    pub total: usize,
}

/// Consistent read-only view of the whole queue
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Queued jobs in admission order
    pub queued: Vec<Job>,
    /// Jobs currently transferring, in admission order
    pub downloading: Vec<Job>,
    /// Completed jobs, oldest first
    pub completed: Vec<Job>,
    /// Failed jobs, oldest first
    pub failed: Vec<Job>,
    /// Quality requested from the executor
    pub quality: Quality,
    /// Concurrency limit
    pub max_concurrent: usize,
}

impl QueueSnapshot {
    /// Counts per status
    pub fn stats(&self) -> QueueStats {
        let queued = self.queued.len();
        let downloading = self.downloading.len();
        let completed = self.completed.len();
        let failed = self.failed.len();
        QueueStats {
            queued,
            downloading,
            completed,
            failed,
            total: queued + downloading + completed + failed,
        }
    }

    /// Find a job in any collection
    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .chain(&self.failed)
            .find(|job| job.id == id)
    }
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job added to the queue
    Queued {
        /// Job ID
        id: JobId,
        /// Upstream track reference
        source_ref: String,
    },

    /// Job admitted and handed to the executor
    Started {
        /// Job ID
        id: JobId,
    },

    /// Progress update accepted by the queue store
    Progress {
        /// Job ID
        id: JobId,
        /// Progress percentage (0 to 100)
        percent: u8,
    },

    /// Job completed
    Completed {
        /// Job ID
        id: JobId,
        /// Artifact name reported by the executor
        artifact: String,
    },

    /// Job failed (including cancellation)
    Failed {
        /// Job ID
        id: JobId,
        /// Failure reason
        error: String,
    },

    /// Failed job moved back to the queue
    Retried {
        /// Job ID
        id: JobId,
    },

    /// Queued job removed by the caller
    Removed {
        /// Job ID
        id: JobId,
    },

    /// Finished jobs cleared by the caller
    Cleared {
        /// Which collection was cleared
        status: Status,
        /// How many jobs were dropped
        count: usize,
    },

    /// Scheduler loop stopped
    Stopped,

    /// Downloader shut down
    Shutdown,
}
