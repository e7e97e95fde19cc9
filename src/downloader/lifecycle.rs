//! Startup and shutdown coordination.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::Event;

use super::{LoopHandle, TrackDownloader};

impl TrackDownloader {
    /// Start the scheduler loop
    ///
    /// Calling this while the loop is already running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<()> {
        if !self.scheduler.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let mut handle = self.scheduler.handle.lock().await;
        if handle.is_some() {
            tracing::debug!("Scheduler already running");
            return Ok(());
        }

        let stop = CancellationToken::new();
        let join = self.spawn_queue_processor(stop.clone());
        *handle = Some(LoopHandle { stop, join });

        let max_concurrent = self.queue.max_concurrent().await;
        tracing::info!(max_concurrent, "Scheduler started");
        Ok(())
    }

    /// Whether the scheduler loop is running
    pub async fn is_running(&self) -> bool {
        self.scheduler.handle.lock().await.is_some()
    }

    /// Stop the scheduler and cancel every in-flight transfer
    ///
    /// The loop finishes its current iteration and exits before any
    /// transfer is cancelled, so nothing is admitted after this returns.
    /// Cancelled jobs settle in `failed` with reason `"cancelled"` once their
    /// executors return; this call does not wait for that. Stopping a
    /// scheduler that is not running does nothing.
    pub async fn stop(&self) {
        let mut handle = self.scheduler.handle.lock().await;
        let Some(LoopHandle { stop, join }) = handle.take() else {
            return;
        };

        stop.cancel();
        if let Err(e) = join.await {
            tracing::warn!(error = %e, "Queue processor ended abnormally");
        }

        let cancelled = self.registry.cancel_all().await;
        tracing::info!(cancelled, "Scheduler stopped");
        self.emit_event(Event::Stopped);
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new jobs
    /// 2. Stops the scheduler, cancelling every in-flight transfer
    /// 3. Waits for those transfers to settle, up to `shutdown_timeout`
    /// 4. Persists final state
    ///
    /// # Errors
    ///
    /// Returns an error if the final save fails.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.scheduler.accepting_new.store(false, Ordering::SeqCst);
        self.stop().await;

        let shutdown_timeout = self.config.scheduler.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.wait_for_in_flight()).await {
            Ok(()) => tracing::info!("All transfers settled"),
            Err(_) => tracing::warn!(
                timeout_ms = shutdown_timeout.as_millis() as u64,
                "Timeout waiting for transfers to settle, proceeding with shutdown"
            ),
        }

        if let Err(e) = self.queue.flush().await {
            tracing::error!(error = %e, "Failed to persist final state during shutdown");
            return Err(e);
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until every admitted job has released its slot
    async fn wait_for_in_flight(&self) {
        loop {
            let in_flight = self.scheduler.in_flight.load(Ordering::SeqCst);
            if in_flight == 0 {
                return;
            }

            tracing::debug!(in_flight, "Waiting for transfers to settle");
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}
