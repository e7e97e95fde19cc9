//! Queue processor: admits the oldest queued job whenever a slot is free.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::types::{Event, JobId};

use super::{SlotGuard, TrackDownloader};

impl TrackDownloader {
    /// Spawn the admission loop
    ///
    /// The loop runs until `stop` is cancelled. It finishes the iteration in
    /// progress first, so an admission is never left half-done.
    pub(crate) fn spawn_queue_processor(
        &self,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.run_queue_processor(stop).await;
        })
    }

    async fn run_queue_processor(&self, stop: CancellationToken) {
        let busy_interval = self.config.scheduler.busy_poll_interval;
        let idle_interval = self.config.scheduler.idle_poll_interval;

        tracing::info!("Queue processor started");

        while !stop.is_cancelled() {
            let view = self.queue.admission_view().await;

            // Jobs still cooling down hold their slot after leaving `downloading`,
            // and restored jobs can sit in `downloading` without a task.
            let occupied = view
                .downloading
                .max(self.scheduler.in_flight.load(Ordering::SeqCst));

            if let Some(head) = view.head
                && occupied < view.max_concurrent
            {
                self.admit(head).await;
                continue;
            }

            let interval = if view.queued == 0 && occupied == 0 {
                idle_interval
            } else {
                busy_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.scheduler.wake.notified() => {}
                _ = stop.cancelled() => {}
            }
        }

        tracing::info!("Queue processor stopped");
    }

    /// Move `id` to downloading and hand it to a transfer task
    ///
    /// Does nothing if the job left the queue since the admission view was
    /// taken (removed by a caller).
    async fn admit(&self, id: JobId) {
        let job = match self.queue.dequeue_to_downloading(id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::debug!(job_id = id.0, error = %e, "Job left the queue before admission");
                return;
            }
        };

        let slot = SlotGuard::acquire(&self.scheduler);
        let cancel = CancellationToken::new();
        let generation = self.registry.register(job.id, cancel.clone()).await;

        let quality = self.queue.quality().await;
        tracing::info!(
            job_id = job.id.0,
            source_ref = %job.source_ref,
            quality = %quality,
            "Starting transfer"
        );
        self.emit_event(Event::Started { id: job.id });

        let downloader = self.clone();
        tokio::spawn(async move {
            downloader
                .run_transfer_task(job, quality, cancel, generation, slot)
                .await;
        });
    }
}
