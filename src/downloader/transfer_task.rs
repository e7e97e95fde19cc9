//! Per-job execution: run the executor, record the outcome, release the slot.

use tokio_util::sync::CancellationToken;

use crate::executor::{CANCELLED_REASON, ProgressReporter, TransferOutcome, TransferRequest};
use crate::types::{Event, Job, JobId, Quality};

use super::{SlotGuard, TrackDownloader};

/// Reason recorded when the executor panicked
pub(crate) const PANICKED_REASON: &str = "transfer task panicked";

impl TrackDownloader {
    /// Drive one admitted job to a terminal state
    ///
    /// The slot is held through the cooldown and released when this returns.
    pub(crate) async fn run_transfer_task(
        &self,
        job: Job,
        quality: Quality,
        cancel: CancellationToken,
        generation: u64,
        slot: SlotGuard,
    ) {
        let id = job.id;
        let reporter = ProgressReporter::new(id, self.queue.clone(), self.event_tx.clone());
        let executor = self.executor.clone();
        let request = TransferRequest { job, quality };

        // Separate task so a panicking executor surfaces as a JoinError
        let transfer =
            tokio::spawn(async move { executor.execute(request, reporter, cancel).await });

        let outcome = match transfer.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = id.0, error = %e, "Transfer task panicked");
                TransferOutcome::Failure(PANICKED_REASON.to_string())
            }
        };

        // Unregister first: once the outcome is recorded a retry can re-admit
        // the same id
        self.registry.unregister(id, generation).await;
        self.record_outcome(id, outcome).await;

        let cooldown = self.config.scheduler.cooldown;
        if !cooldown.is_zero() {
            tokio::time::sleep(cooldown).await;
        }

        drop(slot);
    }

    async fn record_outcome(&self, id: JobId, outcome: TransferOutcome) {
        match outcome {
            TransferOutcome::Success { artifact, location } => {
                match self
                    .queue
                    .complete_downloading(id, artifact.clone(), location)
                    .await
                {
                    Ok(_) => {
                        tracing::info!(job_id = id.0, artifact = %artifact, "Transfer completed");
                        self.emit_event(Event::Completed { id, artifact });
                    }
                    Err(e) => {
                        tracing::warn!(job_id = id.0, error = %e, "Could not record completion");
                    }
                }
            }
            TransferOutcome::Failure(reason) => self.fail_transfer(id, reason).await,
            TransferOutcome::Cancelled => {
                self.fail_transfer(id, CANCELLED_REASON.to_string()).await
            }
        }
    }

    async fn fail_transfer(&self, id: JobId, reason: String) {
        match self.queue.fail_downloading(id, reason.clone()).await {
            Ok(_) => {
                tracing::warn!(job_id = id.0, reason = %reason, "Transfer failed");
                self.emit_event(Event::Failed { id, error: reason });
            }
            Err(e) => {
                tracing::warn!(job_id = id.0, error = %e, "Could not record failure");
            }
        }
    }
}
