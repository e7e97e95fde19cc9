//! Common test utilities for track-dl integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use track_dl::{
    CancellationToken, Config, Event, JobId, ProgressReporter, TrackDownloader, TransferExecutor,
    TransferOutcome, TransferRequest,
};

/// Executor driven by the shape of the source reference
///
/// - `fail:<reason>` fails with `<reason>`
/// - `hold:...` blocks until cancelled
/// - anything else reports 50% then 100% and succeeds
pub struct PrefixExecutor;

#[async_trait::async_trait]
impl TransferExecutor for PrefixExecutor {
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        let source = request.job.source_ref.as_str();
        if let Some(reason) = source.strip_prefix("fail:") {
            return TransferOutcome::failure(reason);
        }
        if source.starts_with("hold:") {
            cancel.cancelled().await;
            return TransferOutcome::Cancelled;
        }

        progress.report_bytes(512, Some(1024)).await;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            _ = cancel.cancelled() => return TransferOutcome::Cancelled,
        }
        progress.report_bytes(1024, Some(1024)).await;
        TransferOutcome::Success {
            artifact: format!("{}.flac", source.replace(':', "_")),
            location: Some("/music".to_string()),
        }
    }
}

/// Config with short intervals and no cooldown
pub fn fast_config(max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.scheduler.max_concurrent = max_concurrent;
    config.scheduler.busy_poll_interval = Duration::from_millis(10);
    config.scheduler.idle_poll_interval = Duration::from_millis(20);
    config.scheduler.cooldown = Duration::ZERO;
    config.scheduler.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Create a downloader using [`PrefixExecutor`]
pub async fn create_downloader(config: Config) -> TrackDownloader {
    TrackDownloader::new(config, Arc::new(PrefixExecutor))
        .await
        .unwrap()
}

/// Terminal result for a job, as observed through events
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// Job completed with this artifact
    Completed(String),
    /// Job failed with this reason
    Failed(String),
    /// Timeout waiting for a terminal event
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for `id` to reach `completed` or `failed`
///
/// Subscribe before enqueueing so the terminal event cannot be missed.
pub async fn wait_for_terminal(
    events: &mut broadcast::Receiver<Event>,
    id: JobId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed {
                    id: event_id,
                    artifact,
                }) if event_id == id => return WaitResult::Completed(artifact),
                Ok(Event::Failed {
                    id: event_id,
                    error,
                }) if event_id == id => return WaitResult::Failed(error),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Poll the queue until `predicate` holds on its stats, panicking after 5 seconds
pub async fn wait_for_stats(
    downloader: &TrackDownloader,
    predicate: impl Fn(&track_dl::QueueStats) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = downloader.get_stats().await;
        if predicate(&stats) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue never reached expected state: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
