//! Bounded-parallelism fan-out for remote listing and attribute calls.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

/// Default number of concurrent in-flight requests.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Why a single fanned-out item produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFailure<E> {
    /// The call returned an error.
    Failed(E),
    /// The task panicked or was cancelled before completing.
    Aborted,
}

/// The aggregated outcome of [`ConcurrentLister::fetch_all`].
///
/// Partial failures are surfaced next to the successes; it is up to the caller whether a missing
/// item matters.
#[derive(Debug)]
pub struct FanOut<K, T, E> {
    /// Items whose call succeeded, in input order.
    pub succeeded: Vec<(K, T)>,
    /// Items whose call did not succeed, in input order.
    pub failed: Vec<(K, ItemFailure<E>)>,
}

impl<K, T, E> FanOut<K, T, E> {
    /// Whether every item succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs many independent backend calls with at most `N` of them in flight.
///
/// Clones share the same bound.
#[derive(Debug, Clone)]
pub struct ConcurrentLister {
    permits: Arc<Semaphore>,
    bound: usize,
}

impl Default for ConcurrentLister {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ConcurrentLister {
    /// Create a lister allowing `bound` concurrent calls. A bound of zero is treated as one.
    #[must_use]
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        Self {
            permits: Arc::new(Semaphore::new(bound)),
            bound,
        }
    }

    /// Run `call` for every item and wait for all of them.
    ///
    /// Each item is spawned as its own task, and each task holds a semaphore permit for the
    /// duration of its call.
    #[instrument(name = "ConcurrentLister::fetch_all", skip_all, fields(bound = self.bound))]
    pub async fn fetch_all<K, T, E, F, Fut>(
        &self,
        items: impl IntoIterator<Item = K>,
        call: F,
    ) -> FanOut<K, T, E>
    where
        K: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let keys: Vec<K> = items.into_iter().collect();
        let mut outcomes: Vec<Option<Result<T, E>>> = Vec::with_capacity(keys.len());
        outcomes.resize_with(keys.len(), || None);

        let mut set = JoinSet::new();
        for (idx, key) in keys.iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let fut = call(key.clone());
            set.spawn(async move {
                // The semaphore is never closed, so acquisition only fails if it were.
                let _permit = permits.acquire_owned().await.ok();
                (idx, fut.await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    if let Some(slot) = outcomes.get_mut(idx) {
                        *slot = Some(outcome);
                    }
                }
                Err(e) => debug!(error = %e, "fan-out task aborted"),
            }
        }

        let mut fan_out = FanOut {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(v)) => fan_out.succeeded.push((key, v)),
                Some(Err(e)) => fan_out.failed.push((key, ItemFailure::Failed(e))),
                None => fan_out.failed.push((key, ItemFailure::Aborted)),
            }
        }
        fan_out
    }
}
