//! Cancellation registry - cancellation tokens of in-flight transfers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::types::JobId;

/// Maps each in-flight job to the token its executor watches
///
/// Cancelling a token only signals the executor; the job's terminal state is
/// written by the per-job task once the executor returns. Cloning the registry
/// shares the underlying map.
///
/// A retried job keeps its id, so every registration gets a generation and
/// [`unregister`](Self::unregister) only removes the registration it names.
#[derive(Clone, Debug, Default)]
pub struct CancellationRegistry {
    tokens: Arc<tokio::sync::Mutex<HashMap<JobId, Registration>>>,
    next_generation: Arc<AtomicU64>,
}

#[derive(Debug)]
struct Registration {
    generation: u64,
    token: CancellationToken,
}

impl CancellationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the token of a newly admitted job
    ///
    /// A token already registered for the same job is cancelled and replaced.
    /// Returns the generation to pass to [`unregister`](Self::unregister).
    pub async fn register(&self, id: JobId, token: CancellationToken) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .tokens
            .lock()
            .await
            .insert(id, Registration { generation, token });
        if let Some(previous) = previous {
            tracing::warn!(job_id = id.0, "Replacing cancellation token of running job");
            previous.token.cancel();
        }
        generation
    }

    /// Signal one job to abort and forget its token
    ///
    /// Returns false if the job was not registered (already finished or never
    /// started), which makes repeated calls harmless.
    pub async fn cancel(&self, id: JobId) -> bool {
        let registration = self.tokens.lock().await.remove(&id);
        match registration {
            Some(registration) => {
                tracing::debug!(job_id = id.0, "Cancelling transfer");
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every registered job to abort and clear the registry
    ///
    /// Returns the number of jobs signalled.
    pub async fn cancel_all(&self) -> usize {
        let mut tokens = self.tokens.lock().await;
        let count = tokens.len();
        for (id, registration) in tokens.drain() {
            tracing::debug!(job_id = id.0, "Cancelling transfer");
            registration.token.cancel();
        }
        count
    }

    /// Forget a job's token without cancelling it
    ///
    /// Only the registration with `generation` is removed; a newer one for the
    /// same job (after a retry) stays. Returns whether anything was removed.
    pub async fn unregister(&self, id: JobId, generation: u64) -> bool {
        let mut tokens = self.tokens.lock().await;
        match tokens.get(&id) {
            Some(registration) if registration.generation == generation => {
                tokens.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Whether a job is registered
    pub async fn contains(&self, id: JobId) -> bool {
        self.tokens.lock().await.contains_key(&id)
    }

    /// Number of registered jobs
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Whether nothing is registered
    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }
}
