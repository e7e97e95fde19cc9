//! # track-dl
//!
//! Bounded-concurrency download queue for music tracks.
//!
//! Callers enqueue tracks, a scheduler loop admits the oldest queued job
//! whenever fewer than `max_concurrent` transfers are in flight, and a
//! caller-supplied [`TransferExecutor`] performs each transfer. Every job
//! ends up `completed` or `failed`; failed jobs can be retried.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI; the transfer itself is pluggable
//! - **Strict ordering** - Jobs start in the order they were queued
//! - **Cooperative cancellation** - Stopping signals executors, never aborts them
//! - **Event-driven** - Consumers subscribe to events instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use track_dl::{
//!     CancellationToken, Config, NewJob, ProgressReporter, TrackDownloader, TransferExecutor,
//!     TransferOutcome, TransferRequest,
//! };
//!
//! struct Fetcher;
//!
//! #[async_trait::async_trait]
//! impl TransferExecutor for Fetcher {
//!     async fn execute(
//!         &self,
//!         request: TransferRequest,
//!         progress: ProgressReporter,
//!         _cancel: CancellationToken,
//!     ) -> TransferOutcome {
//!         progress.report(100).await;
//!         TransferOutcome::success(format!("{}.flac", request.job.source_ref))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = TrackDownloader::new(Config::default(), Arc::new(Fetcher)).await?;
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader.enqueue([NewJob::new("tidal:track:1")]).await?;
//!     downloader.start().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// SQLite state store
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Transfer executor seam and progress reporting
pub mod executor;
/// Queue state persistence
pub mod persistence;
/// Job collections and state transitions
pub mod queue;
/// Cancellation tokens of in-flight transfers
pub mod registry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, OrphanPolicy, PersistenceConfig, SchedulerConfig, StoreBackend};
pub use db::Database;
pub use downloader::TrackDownloader;
pub use error::{DatabaseError, Error, Result};
pub use executor::{
    CANCELLED_REASON, ProgressReporter, TransferExecutor, TransferOutcome, TransferRequest,
};
pub use persistence::{
    INTERRUPTED_REASON, JsonFileStore, MemoryStateStore, PersistedState, StateStore,
};
pub use queue::QueueStore;
pub use registry::CancellationRegistry;
pub use tokio_util::sync::CancellationToken;
pub use types::{Event, Job, JobId, NewJob, Quality, QueueSnapshot, QueueStats, Status};

/// Run the downloader until a termination signal arrives, then shut it down.
///
/// Starts the scheduler if it is not running yet.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever can be registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use track_dl::{Config, TrackDownloader, TransferExecutor, run_with_shutdown};
/// # async fn example(executor: Arc<dyn TransferExecutor>) -> track_dl::Result<()> {
/// let downloader = TrackDownloader::new(Config::default(), executor).await?;
/// run_with_shutdown(downloader).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(downloader: TrackDownloader) -> Result<()> {
    downloader.start().await?;
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    } else {
        tracing::info!("Received Ctrl+C signal");
    }
}
