//! Single-slot shared buffer.
//!
//! The only mutable state crossing task boundaries: the acquisition loop
//! writes the latest [`Reading`](crate::source::Reading) and the publisher
//! reads it. Last-write-wins by design — no queueing, no history; a slow
//! consumer misses intermediate samples in exchange for bounded memory and
//! latency. Both sides acquire the lock with a bounded wait so neither task
//! can be stalled indefinitely by the other.

use crate::error::{AppResult, CapError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

pub struct SharedSlot<T> {
    inner: Mutex<Option<T>>,
    lock_wait: Duration,
}

impl<T: Clone> SharedSlot<T> {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            lock_wait,
        }
    }

    /// Overwrite the slot with `value`.
    ///
    /// On lock timeout the sample is dropped and the prior value is left
    /// untouched; the caller logs and continues with the next cycle.
    pub async fn write(&self, value: T) -> AppResult<()> {
        let mut guard = timeout(self.lock_wait, self.inner.lock())
            .await
            .map_err(|_| CapError::SlotLockTimeout(self.lock_wait))?;
        *guard = Some(value);
        Ok(())
    }

    /// Copy out the most recent value, `None` if nothing was written yet.
    pub async fn read_latest(&self) -> AppResult<Option<T>> {
        let guard = timeout(self.lock_wait, self.inner.lock())
            .await
            .map_err(|_| CapError::SlotLockTimeout(self.lock_wait))?;
        Ok(guard.clone())
    }
}
