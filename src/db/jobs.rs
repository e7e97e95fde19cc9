//! Job rows and queue settings - whole-state load and save.

use crate::error::DatabaseError;
use crate::persistence::{PersistedState, StateStore};
use crate::types::{Job, JobId, Quality, Status};
use crate::{Error, Result};

use super::{Database, JobRow};

const QUALITY_KEY: &str = "quality";
const MAX_CONCURRENT_KEY: &str = "max_concurrent";

impl Database {
    /// Replace all stored jobs and settings with `state` in one transaction
    pub async fn save_state(&self, state: &PersistedState) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM jobs")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear jobs: {}",
                    e
                )))
            })?;

        let collections = [
            (Status::Queued, &state.queued),
            (Status::Downloading, &state.downloading),
            (Status::Completed, &state.completed),
            (Status::Failed, &state.failed),
        ];
        for (status, jobs) in collections {
            for (position, job) in jobs.iter().enumerate() {
                let metadata = serde_json::to_string(&job.metadata)?;
                sqlx::query(
                    r#"
                    INSERT INTO jobs (
                        id, source_ref, name, metadata, status, position,
                        progress, error, artifact, location,
                        added_at, started_at, completed_at, failed_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(job.id)
                .bind(&job.source_ref)
                .bind(&job.name)
                .bind(metadata)
                .bind(status.to_i32())
                .bind(position as i64)
                .bind(i64::from(job.progress))
                .bind(&job.error)
                .bind(&job.artifact)
                .bind(&job.location)
                .bind(job.added_at.timestamp_millis())
                .bind(job.started_at.map(|t| t.timestamp_millis()))
                .bind(job.completed_at.map(|t| t.timestamp_millis()))
                .bind(job.failed_at.map(|t| t.timestamp_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert job {}: {}",
                        job.id, e
                    )))
                })?;
            }
        }

        let settings = [
            (QUALITY_KEY, state.quality.as_str().to_string()),
            (MAX_CONCURRENT_KEY, state.max_concurrent.to_string()),
        ];
        for (key, value) in settings {
            sqlx::query(
                r#"
                INSERT INTO queue_settings (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to store setting {}: {}",
                    key, e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit queue state: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Update the progress of one downloading job
    ///
    /// Returns false if no downloading row exists for `id`.
    pub async fn update_progress(&self, id: JobId, progress: u8) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET progress = ? WHERE id = ? AND status = ?")
            .bind(i64::from(progress))
            .bind(id)
            .bind(Status::Downloading.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update progress of job {}: {}",
                    id, e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Load the stored queue state, or `None` if nothing was ever saved
    pub async fn load_state(&self) -> Result<Option<PersistedState>> {
        let Some(max_concurrent) = self.get_setting(MAX_CONCURRENT_KEY).await? else {
            return Ok(None);
        };
        let max_concurrent = max_concurrent.parse::<usize>().map_err(|e| {
            Error::Database(DatabaseError::CorruptRecord(format!(
                "invalid max_concurrent setting: {}",
                e
            )))
        })?;
        let quality = match self.get_setting(QUALITY_KEY).await? {
            Some(value) => value.parse::<Quality>()?,
            None => Quality::default(),
        };

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT
                id, source_ref, name, metadata, status, position,
                progress, error, artifact, location,
                added_at, started_at, completed_at, failed_at
            FROM jobs
            ORDER BY status, position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load jobs: {}",
                e
            )))
        })?;

        let mut state = PersistedState::empty(quality, max_concurrent);
        for row in rows {
            let job = Job::try_from(row)?;
            match job.status {
                Status::Queued => state.queued.push(job),
                Status::Downloading => state.downloading.push(job),
                Status::Completed => state.completed.push(job),
                Status::Failed => state.failed.push(job),
            }
        }

        Ok(Some(state))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM queue_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read setting {}: {}",
                    key, e
                )))
            })
    }
}

#[async_trait::async_trait]
impl StateStore for Database {
    async fn load(&self) -> Result<Option<PersistedState>> {
        self.load_state().await
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        self.save_state(state).await
    }

    async fn save_progress(&self, state: &PersistedState, id: JobId, progress: u8) -> Result<()> {
        // A missing row means an earlier save failed, so write everything
        if !self.update_progress(id, progress).await? {
            self.save_state(state).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
