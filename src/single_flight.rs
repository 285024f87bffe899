//! Collapses concurrent work for the same key into one execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// The shared task ended without producing a value (it panicked or was aborted).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("in-flight task aborted: {0}")]
pub struct FlightAborted(pub String);

type Slot<T> = watch::Receiver<Option<Result<T, FlightAborted>>>;
type Flights<T> = Arc<Mutex<HashMap<String, Slot<T>>>>;

pub struct SingleFlight<T> {
    flights: Flights<T>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Releases the key when the owning task ends, however it ends.
struct FlightGuard<T> {
    flights: Flights<T>,
    key: String,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        lock(&self.flights).remove(&self.key);
    }
}

fn lock<T>(flights: &Flights<T>) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` for `key` unless a run is already in flight, in which case the
    /// caller waits for that run instead. Every caller gets a clone of the same value.
    ///
    /// `f` runs on its own task: dropping the calling future does not cancel it.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (mut slot, leader) = {
            let mut flights = lock(&self.flights);
            match flights.get(key) {
                Some(existing) => {
                    tracing::debug!("{}: joining in-flight resolution", key);
                    (existing.clone(), None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    flights.insert(key.to_string(), rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        // Started outside the lock: the guard re-locks the map when dropped.
        if let Some(tx) = leader {
            let guard = FlightGuard {
                flights: Arc::clone(&self.flights),
                key: key.to_string(),
            };
            let work = tokio::spawn(f());
            tokio::spawn(async move {
                let outcome = work.await.map_err(|e| FlightAborted(e.to_string()));
                drop(guard);
                // No receivers left is fine: every caller went away.
                let _ = tx.send(Some(outcome));
            });
        }

        let settled = slot
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlightAborted("in-flight task dropped".to_string()))?;

        match settled.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(FlightAborted("in-flight task produced no value".to_string())),
        }
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }
}
