//! At most one in-flight call per key. Later callers for the same key attach
//! to the pending call and receive a clone of its output.
//!
//! The call runs as its own task: dropping every waiter does not stop it, and
//! it deregisters itself when it finishes.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;

/// The task driving a call panicked or was cancelled by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("in-flight call aborted: {0}")]
pub struct FlightAborted(pub String);

type Flight<V> = Shared<BoxFuture<'static, Result<V, FlightAborted>>>;

pub struct SingleFlight<K, V> {
    calls: Arc<Mutex<HashMap<K, Flight<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Await the call for `key`, spawning it with `start` only if none is
    /// pending. Must be called within a Tokio runtime.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut calls = self.calls.lock();
            match calls.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.calls);
                    let own_key = key.clone();
                    let call = start();
                    // Blocks on `calls` until this entry is inserted below.
                    let task = tokio::spawn(async move {
                        let output = call.await;
                        registry.lock().remove(&own_key);
                        output
                    });

                    let registry = Arc::clone(&self.calls);
                    let own_key = key.clone();
                    let flight = async move {
                        task.await.map_err(|e| {
                            // A panicked task never reached its own removal.
                            registry.lock().remove(&own_key);
                            FlightAborted(e.to_string())
                        })
                    }
                    .boxed()
                    .shared();
                    calls.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Number of calls currently pending.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.calls.lock().contains_key(key)
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
