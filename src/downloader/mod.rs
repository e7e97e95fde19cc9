//! Core downloader implementation split into focused submodules.
//!
//! The `TrackDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Caller-facing queue operations and state restoration
//! - [`control`] - Cancellation of individual transfers
//! - [`config_ops`] - Runtime setting updates (quality, concurrency)
//! - [`lifecycle`] - Start, stop and shutdown
//! - [`queue_processor`] - The admission loop
//! - [`transfer_task`] - Per-job execution and outcome recording

mod config_ops;
mod control;
mod lifecycle;
mod queue;
mod queue_processor;
mod transfer_task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::config::{Config, StoreBackend};
use crate::db::Database;
use crate::error::Result;
use crate::executor::TransferExecutor;
use crate::persistence::{JsonFileStore, StateStore};
use crate::queue::QueueStore;
use crate::registry::CancellationRegistry;
use crate::types::Event;

/// Running queue processor
pub(crate) struct LoopHandle {
    /// Cancelled by `stop()`; the loop checks it between iterations
    pub(crate) stop: CancellationToken,
    pub(crate) join: tokio::task::JoinHandle<()>,
}

/// Scheduler loop bookkeeping
#[derive(Clone)]
pub(crate) struct SchedulerState {
    /// Handle of the running loop (None while stopped)
    pub(crate) handle: Arc<tokio::sync::Mutex<Option<LoopHandle>>>,
    /// Wakes the loop before its poll interval elapses
    pub(crate) wake: Arc<tokio::sync::Notify>,
    /// Slots held by admitted jobs, including jobs still in their cooldown
    pub(crate) in_flight: Arc<AtomicUsize>,
    /// Cleared by `shutdown()`; no new work is accepted afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            handle: Arc::new(tokio::sync::Mutex::new(None)),
            wake: Arc::new(tokio::sync::Notify::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// One admitted job's hold on a concurrency slot
///
/// Released on drop, which also wakes the loop so the slot is reused promptly.
pub(crate) struct SlotGuard {
    in_flight: Arc<AtomicUsize>,
    wake: Arc<tokio::sync::Notify>,
}

impl SlotGuard {
    pub(crate) fn acquire(scheduler: &SchedulerState) -> Self {
        scheduler.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            in_flight: scheduler.in_flight.clone(),
            wake: scheduler.wake.clone(),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TrackDownloader {
    /// Job collections and their transitions
    pub(crate) queue: Arc<QueueStore>,
    /// Cancellation tokens of in-flight transfers
    pub(crate) registry: CancellationRegistry,
    /// Performs the actual transfers
    pub(crate) executor: Arc<dyn TransferExecutor>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Scheduler loop bookkeeping
    pub(crate) scheduler: SchedulerState,
}

impl TrackDownloader {
    /// Create a new TrackDownloader instance
    ///
    /// Opens the state store selected by `config.persistence.backend`,
    /// restores any saved queue and reconciles interrupted transfers. The
    /// scheduler loop is not started; call [`start`](Self::start).
    pub async fn new(config: Config, executor: Arc<dyn TransferExecutor>) -> Result<Self> {
        config.validate()?;

        let state_store: Option<Arc<dyn StateStore>> = match &config.persistence.backend {
            StoreBackend::None => None,
            StoreBackend::Json { path } => Some(Arc::new(JsonFileStore::new(path))),
            StoreBackend::Sqlite { path } => Some(Arc::new(Database::new(path).await?)),
        };

        Self::with_state_store(config, executor, state_store).await
    }

    /// Create a TrackDownloader with an explicitly supplied state store
    ///
    /// `config.persistence.backend` is ignored.
    pub async fn with_state_store(
        config: Config,
        executor: Arc<dyn TransferExecutor>,
        state_store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let (state, reconciled) = Self::restore_state(&config, state_store.as_ref()).await?;
        let queue = Arc::new(QueueStore::from_persisted(state, state_store)?);
        if reconciled {
            queue.flush().await?;
        }

        // Create broadcast channel; lagging subscribers get RecvError::Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(config.scheduler.event_buffer);

        Ok(Self {
            queue,
            registry: CancellationRegistry::new(),
            executor,
            event_tx,
            config: Arc::new(config),
            scheduler: SchedulerState::new(),
        })
    }

    /// Subscribe to job events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than `event_buffer` events
    /// receives a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Number of transfers that can currently be cancelled
    pub async fn active_transfers(&self) -> usize {
        self.registry.len().await
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
