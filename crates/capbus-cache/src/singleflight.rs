//! In-flight deduplication: concurrent work for the same key collapses into
//! a single execution whose outcome every caller observes.

use std::collections::HashMap;
use std::future::Future;

use capbus_core::CapabilityError;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use parking_lot::Mutex;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, CapabilityError>>>;

/// Collapses concurrent calls with the same key into one awaited outcome.
///
/// The factory runs exactly once per burst; every waiter gets a clone of the
/// settled result, success or failure. The entry is removed once settled,
/// so a later call is free to retry.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<HashMap<String, SharedOutcome<T>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Join the in-flight execution for `key`, or start one via `factory`.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<T, CapabilityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(existing) => existing.clone(),
                None => {
                    let shared = factory().boxed().shared();
                    inflight.insert(key.to_string(), shared.clone());
                    shared
                }
            }
        };

        let outcome = shared.clone().await;

        // Every waiter races to remove the settled entry; ptr_eq guards
        // against dropping a newer flight that reused the key.
        let mut inflight = self.inflight.lock();
        if let Some(current) = inflight.get(key)
            && Shared::ptr_eq(current, &shared)
        {
            inflight.remove(key);
        }

        outcome
    }
}
