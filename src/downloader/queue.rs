//! Caller-facing queue operations and state restoration.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::persistence::{PersistedState, StateStore};
use crate::types::{Event, Job, JobId, NewJob, QueueSnapshot, QueueStats, Status};

use super::TrackDownloader;

impl TrackDownloader {
    /// Add tracks to the back of the queue
    ///
    /// Inputs whose `source_ref` is already queued, downloading or completed
    /// (or repeated within the batch) are skipped. Returns the jobs that were
    /// admitted, in input order. An empty batch is a no-op.
    pub async fn enqueue(&self, inputs: impl IntoIterator<Item = NewJob>) -> Result<Vec<Job>> {
        if !self.scheduler.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let inputs: Vec<NewJob> = inputs.into_iter().collect();
        let requested = inputs.len();
        let admitted = self.queue.enqueue(inputs).await;

        for job in &admitted {
            self.emit_event(Event::Queued {
                id: job.id,
                source_ref: job.source_ref.clone(),
            });
        }

        if !admitted.is_empty() {
            tracing::info!(
                admitted = admitted.len(),
                skipped = requested - admitted.len(),
                "Tracks queued"
            );
            self.scheduler.wake.notify_one();
        } else if requested > 0 {
            tracing::debug!(skipped = requested, "All tracks already present");
        }

        Ok(admitted)
    }

    /// Remove a job that has not been admitted yet
    pub async fn remove(&self, id: JobId) -> Result<Job> {
        let job = self.queue.remove(id).await?;
        tracing::info!(job_id = id.0, "Removed queued job");
        self.emit_event(Event::Removed { id });
        Ok(job)
    }

    /// Move a failed job back to the end of the queue
    ///
    /// Fails with [`Error::Duplicate`] if the same track was queued again in
    /// the meantime.
    pub async fn retry(&self, id: JobId) -> Result<Job> {
        if !self.scheduler.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let job = self.queue.retry(id).await?;
        tracing::info!(job_id = id.0, source_ref = %job.source_ref, "Retrying job");
        self.emit_event(Event::Retried { id });
        self.scheduler.wake.notify_one();
        Ok(job)
    }

    /// Drop all completed jobs, returning how many were removed
    pub async fn clear_completed(&self) -> usize {
        let count = self.queue.clear_completed().await;
        if count > 0 {
            self.emit_event(Event::Cleared {
                status: Status::Completed,
                count,
            });
        }
        count
    }

    /// Drop all failed jobs, returning how many were removed
    pub async fn clear_failed(&self) -> usize {
        let count = self.queue.clear_failed().await;
        if count > 0 {
            self.emit_event(Event::Cleared {
                status: Status::Failed,
                count,
            });
        }
        count
    }

    /// Collection sizes
    pub async fn get_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Consistent copy of every collection and the queue settings
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot().await
    }

    /// Look up a job by id in any collection
    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.queue.get(id).await
    }

    /// Most relevant job for a track, preferring active ones
    pub async fn find_by_source(&self, source_ref: &str) -> Option<Job> {
        self.queue.find_by_source(source_ref).await
    }

    /// Load saved state and prepare it for a fresh scheduler
    ///
    /// Returns the state to start from and whether it differs from what was
    /// stored (so the caller can write the reconciled version back).
    pub(crate) async fn restore_state(
        config: &Config,
        state_store: Option<&Arc<dyn StateStore>>,
    ) -> Result<(PersistedState, bool)> {
        let empty = || {
            PersistedState::empty(config.scheduler.quality, config.scheduler.max_concurrent)
        };

        let Some(store) = state_store else {
            return Ok((empty(), false));
        };

        let Some(mut state) = store.load().await? else {
            tracing::debug!(backend = store.name(), "No saved queue state");
            return Ok((empty(), false));
        };

        let now = chrono::Utc::now();
        let pruned = match config.persistence.finished_retention {
            Some(max_age) => state.prune_finished(max_age, now),
            None => 0,
        };
        let orphans = state.reconcile_orphans(config.persistence.orphan_policy, now);

        tracing::info!(
            backend = store.name(),
            queued = state.queued.len(),
            completed = state.completed.len(),
            failed = state.failed.len(),
            orphans,
            orphan_policy = ?config.persistence.orphan_policy,
            pruned,
            "Restored queue state"
        );

        Ok((state, pruned + orphans > 0))
    }
}
