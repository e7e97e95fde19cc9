//! Transfer control - cancelling individual in-flight jobs.

use crate::error::{Error, Result};
use crate::types::{JobId, Status};

use super::TrackDownloader;

impl TrackDownloader {
    /// Cancel an in-flight transfer
    ///
    /// Signals the job's cancellation token. The executor is expected to stop
    /// and return [`TransferOutcome::Cancelled`](crate::TransferOutcome::Cancelled),
    /// after which the job moves to `failed` with reason `"cancelled"`. This
    /// call does not wait for that to happen.
    ///
    /// Queued jobs are not affected; use [`remove`](Self::remove) for those.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no transfer is registered for `id`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use track_dl::*;
    /// # async fn example(downloader: TrackDownloader, id: JobId) -> Result<()> {
    /// downloader.cancel(id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        if self.registry.cancel(id).await {
            tracing::info!(job_id = id.0, "Cancellation requested");
            Ok(())
        } else {
            Err(Error::NotFound {
                id,
                expected: Status::Downloading,
            })
        }
    }
}
