//! Request coalescing for async computations.
//!
//! Given a key and an async factory, ensures that concurrent callers for the same key share one
//! in-flight execution of the factory via a [`Shared`] future. Unlike a cache, a flight is
//! forgotten as soon as it completes: the next caller after completion starts a fresh flight.
//! Callers that want memoization layer it on top (see
//! [`MetadataCache`](super::metadata::MetadataCache)).

use std::panic::AssertUnwindSafe;
use std::{fmt::Debug, future::Future, hash::Hash, pin::Pin};

use futures::FutureExt as _;
use futures::future::Shared;
use thiserror::Error;

/// The outcome of a flight that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum FlightError<E> {
    /// The factory returned an error. Every joined caller receives a clone of it.
    #[error(transparent)]
    Failed(E),

    /// The factory panicked. Nothing is retained; the next caller starts over.
    #[error("in-flight computation panicked")]
    Panicked,
}

/// `None` signals that the factory panicked (caught by `catch_unwind`).
type SharedFlight<V, E> = Shared<Pin<Box<dyn Future<Output = Option<Result<V, E>>> + Send>>>;

/// Deduplicates concurrent async work by key.
///
/// If [`run`](Self::run) is called concurrently for the same key, only one invocation of the
/// factory runs. All callers receive a clone of its result, success or failure.
pub struct SingleFlight<K, V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    flights: scc::HashMap<K, SharedFlight<V, E>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self {
            flights: scc::HashMap::default(),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Debug + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Run `factory` for `key`, or join the flight already running for it.
    ///
    /// The factory closure itself is only called by the caller that starts the flight. A joined
    /// caller drops its own `factory` unused, before it starts waiting.
    pub async fn run<F, Fut>(&self, key: K, factory: F) -> Result<V, FlightError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let shared = match self.flights.entry_async(key.clone()).await {
            scc::hash_map::Entry::Occupied(occ) => {
                drop(factory);
                occ.get().clone()
            }
            scc::hash_map::Entry::Vacant(vac) => {
                let shared = Self::make_shared(factory);
                let ret = shared.clone();
                vac.insert_entry(shared);
                ret
            }
        };

        let mut guard = LandingGuard {
            flights: &self.flights,
            key: &key,
            flight: Some(shared.clone()),
        };

        let outcome = shared.await;

        // The flight has landed; retire it so later callers start a fresh one.
        if let Some(flight) = guard.flight.take() {
            drop(
                self.flights
                    .remove_if_async(&key, |slot| slot.ptr_eq(&flight))
                    .await,
            );
        }

        match outcome {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(FlightError::Failed(e)),
            None => Err(FlightError::Panicked),
        }
    }

    /// Returns the number of flights currently in the air.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Wrap a factory future in `catch_unwind`, producing a `Shared` whose output is `None` on
    /// panic.
    fn make_shared<F, Fut>(factory: F) -> SharedFlight<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let fut = AssertUnwindSafe(factory()).catch_unwind();
        let boxed: Pin<Box<dyn Future<Output = Option<Result<V, E>>> + Send>> =
            Box::pin(async move { fut.await.ok() });
        boxed.shared()
    }
}

/// Drop guard that retires a landed flight if the caller is cancelled between the flight
/// completing and the async removal running.
///
/// A flight that has not landed yet is left in place: another caller may still be driving it,
/// and a later caller can pick it up and drive it to completion.
struct LandingGuard<'a, K, V, E>
where
    K: Eq + Hash,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    flights: &'a scc::HashMap<K, SharedFlight<V, E>>,
    key: &'a K,
    flight: Option<SharedFlight<V, E>>,
}

impl<K, V, E> Drop for LandingGuard<'_, K, V, E>
where
    K: Eq + Hash,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take()
            && flight.peek().is_some()
        {
            drop(
                self.flights
                    .remove_if_sync(self.key, |slot| slot.ptr_eq(&flight)),
            );
        }
    }
}
