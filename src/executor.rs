//! Transfer executor seam - the collaborator that actually moves the bytes.
//!
//! The scheduler never performs transfers itself. For every admitted job it
//! calls [`TransferExecutor::execute`] with a [`ProgressReporter`] and a
//! [`CancellationToken`], and records whatever [`TransferOutcome`] comes back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::queue::QueueStore;
use crate::types::{Event, Job, JobId, Quality};

/// Reason recorded on jobs whose executor returned [`TransferOutcome::Cancelled`]
pub const CANCELLED_REASON: &str = "cancelled";

/// Everything the executor needs to know about one transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// The job as it was when admitted
    pub job: Job,
    /// Quality setting at admission time
    pub quality: Quality,
}

/// How a transfer ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Transfer finished
    Success {
        /// Artifact name, e.g. the written filename
        artifact: String,
        /// Where the artifact ended up, if the executor knows
        location: Option<String>,
    },
    /// Transfer failed with a human-readable reason
    Failure(String),
    /// Executor observed the cancellation token and stopped
    Cancelled,
}

impl TransferOutcome {
    /// Successful outcome without a location
    pub fn success(artifact: impl Into<String>) -> Self {
        TransferOutcome::Success {
            artifact: artifact.into(),
            location: None,
        }
    }

    /// Failed outcome
    pub fn failure(reason: impl Into<String>) -> Self {
        TransferOutcome::Failure(reason.into())
    }
}

/// Performs the transfer for one job
///
/// Implementations must be cooperative: watch `cancel` and return
/// [`TransferOutcome::Cancelled`] promptly once it fires. The scheduler never
/// aborts an executor future from outside. Errors are reported through the
/// outcome, never by panicking; a panic is still caught and recorded as a
/// failure.
#[async_trait::async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Run the transfer, reporting progress along the way
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> TransferOutcome;
}

/// Handle through which an executor reports progress for its job
///
/// Updates are applied in call order. Updates that would lower the progress
/// are dropped silently.
#[derive(Clone)]
pub struct ProgressReporter {
    id: JobId,
    queue: Arc<QueueStore>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    pub(crate) fn new(
        id: JobId,
        queue: Arc<QueueStore>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        Self {
            id,
            queue,
            event_tx,
        }
    }

    /// The job this reporter belongs to
    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Report a percentage (values above 100 are clamped)
    ///
    /// Returns true if the queue store accepted the update.
    pub async fn report(&self, percent: u32) -> bool {
        match self.queue.update_progress(self.id, percent).await {
            Some(percent) => {
                self.event_tx
                    .send(Event::Progress {
                        id: self.id,
                        percent,
                    })
                    .ok();
                true
            }
            None => false,
        }
    }

    /// Report transferred bytes against an optional total
    ///
    /// Without a known total (or with a total of zero) no percentage can be
    /// derived and the job keeps its last reported progress.
    pub async fn report_bytes(&self, transferred: u64, total: Option<u64>) -> bool {
        match total {
            Some(total) if total > 0 => {
                let percent = (u128::from(transferred.min(total)) * 100 / u128::from(total)) as u32;
                self.report(percent).await
            }
            _ => false,
        }
    }
}
