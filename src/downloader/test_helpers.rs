//! Shared test helpers for creating TrackDownloader instances in tests.

use crate::config::Config;
use crate::downloader::TrackDownloader;
use crate::executor::{ProgressReporter, TransferExecutor, TransferOutcome, TransferRequest};
use crate::persistence::StateStore;
use crate::types::{Event, JobId, NewJob, Quality, QueueSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the test executor does for a given track
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Report each step, then succeed with `<source_ref>.flac`
    Succeed(Vec<u32>),
    /// Fail immediately with the given reason
    Fail(String),
    /// Sleep, then succeed (returns Cancelled if cancelled first)
    Delay(Duration),
    /// Block until cancelled
    UntilCancelled,
    /// Panic inside the executor
    Panic,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executor whose behaviour is scripted per source reference
pub(crate) struct TestExecutor {
    default: Script,
    scripts: std::sync::Mutex<HashMap<String, Script>>,
    started: std::sync::Mutex<Vec<(JobId, String, Quality)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl TestExecutor {
    pub(crate) fn new(default: Script) -> Arc<Self> {
        Arc::new(Self {
            default,
            scripts: std::sync::Mutex::new(HashMap::new()),
            started: std::sync::Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Override the behaviour for one track
    pub(crate) fn script(&self, source_ref: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(source_ref.to_string(), script);
    }

    /// Source references in the order their transfers started
    pub(crate) fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(_, source, _)| source.clone())
            .collect()
    }

    /// Quality passed to each transfer, in start order
    pub(crate) fn qualities(&self) -> Vec<Quality> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, quality)| *quality)
            .collect()
    }

    /// Highest number of transfers that ran at the same time
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TransferExecutor for TestExecutor {
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        let source_ref = request.job.source_ref.clone();
        self.started
            .lock()
            .unwrap()
            .push((request.job.id, source_ref.clone(), request.quality));

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&source_ref)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match script {
            Script::Succeed(steps) => {
                for step in steps {
                    progress.report(step).await;
                }
                TransferOutcome::success(format!("{source_ref}.flac"))
            }
            Script::Fail(reason) => TransferOutcome::Failure(reason),
            Script::Delay(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => TransferOutcome::success(format!("{source_ref}.flac")),
                    _ = cancel.cancelled() => TransferOutcome::Cancelled,
                }
            }
            Script::UntilCancelled => {
                cancel.cancelled().await;
                TransferOutcome::Cancelled
            }
            Script::Panic => panic!("executor exploded on {source_ref}"),
        }
    }
}

/// Config with short intervals and no cooldown
pub(crate) fn test_config(max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.scheduler.max_concurrent = max_concurrent;
    config.scheduler.busy_poll_interval = Duration::from_millis(10);
    config.scheduler.idle_poll_interval = Duration::from_millis(20);
    config.scheduler.cooldown = Duration::ZERO;
    config.scheduler.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Helper to create a test TrackDownloader with in-memory state.
pub(crate) async fn create_test_downloader(
    max_concurrent: usize,
    executor: Arc<TestExecutor>,
) -> TrackDownloader {
    create_test_downloader_with(test_config(max_concurrent), executor, None).await
}

/// Helper to create a test TrackDownloader with an explicit config and state store.
pub(crate) async fn create_test_downloader_with(
    config: Config,
    executor: Arc<TestExecutor>,
    state_store: Option<Arc<dyn StateStore>>,
) -> TrackDownloader {
    TrackDownloader::with_state_store(config, executor, state_store)
        .await
        .unwrap()
}

/// Build `NewJob`s for the given source references
pub(crate) fn tracks(sources: &[&str]) -> Vec<NewJob> {
    sources.iter().map(|source| NewJob::new(*source)).collect()
}

/// Poll the queue until `predicate` holds, panicking after 5 seconds
pub(crate) async fn wait_for_snapshot(
    downloader: &TrackDownloader,
    predicate: impl Fn(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = downloader.snapshot().await;
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("queue never reached expected state: {:?}", snapshot.stats());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Collect events until one matches `predicate` (inclusive), panicking after 5 seconds
pub(crate) async fn recv_until(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("no matching event, got {:?}", events))
            .unwrap();
        let done = predicate(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}
