//! Runtime setting updates - quality and concurrency.

use crate::error::Result;
use crate::types::Quality;

use super::TrackDownloader;

impl TrackDownloader {
    /// Current quality setting
    pub async fn quality(&self) -> Quality {
        self.queue.quality().await
    }

    /// Change the quality requested for transfers admitted from now on
    ///
    /// Transfers already in flight keep the quality they were started with.
    pub async fn set_quality(&self, quality: Quality) {
        self.queue.set_quality(quality).await;
        tracing::info!(quality = %quality, "Quality updated");
    }

    /// Current concurrency limit
    pub async fn max_concurrent(&self) -> usize {
        self.queue.max_concurrent().await
    }

    /// Change the concurrency limit
    ///
    /// Raising the limit lets the scheduler admit more jobs right away.
    /// Lowering it never interrupts running transfers; new admissions wait
    /// until the number in flight drops below the new limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `max_concurrent` is zero.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<()> {
        self.queue.set_max_concurrent(max_concurrent).await?;
        tracing::info!(max_concurrent, "Concurrency limit updated");
        self.scheduler.wake.notify_one();
        Ok(())
    }
}
