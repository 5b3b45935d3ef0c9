//! Single-slot memoized future shared by concurrent callers.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};

use gatewarden_core::{Error, Result};

type SharedAttempt<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

struct Slot<T: Clone> {
    generation: u64,
    attempt: Option<SharedAttempt<T>>,
}

/// Runs at most one operation at a time; callers arriving while it is in
/// flight attach to it and receive the same result.
///
/// The slot is cleared once the operation settles, whether it succeeded or
/// failed, so the next caller starts a fresh attempt. Errors reach every
/// caller as `Error::Shared`.
pub struct SingleFlight<T: Clone> {
    slot: Mutex<Slot<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                attempt: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn in_flight(&self) -> bool {
        self.lock().attempt.is_some()
    }

    /// Join the in-flight operation, or start one with `make`.
    pub async fn run<F>(&self, make: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let (generation, attempt) = {
            let mut slot = self.lock();
            match &slot.attempt {
                Some(attempt) => (slot.generation, attempt.clone()),
                None => {
                    slot.generation += 1;
                    let attempt = make().map(|r| r.map_err(Arc::new)).boxed().shared();
                    slot.attempt = Some(attempt.clone());
                    (slot.generation, attempt)
                }
            }
        };

        let result = attempt.await;

        {
            let mut slot = self.lock();
            if slot.generation == generation {
                slot.attempt = None;
            }
        }

        result.map_err(Error::Shared)
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
