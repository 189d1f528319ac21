//! Bounded-wait locking for the shared maps.
//!
//! Every map the bridge shares between threads (instance manager, registry
//! namespaces, loaded instances) is guarded by a `TimedMutex`. A caller that
//! cannot get the lock within the configured timeout gets `Busy` instead of
//! blocking.

use crate::error::{BridgeError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

/// Wait used when no configuration is at hand.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct TimedMutex<T> {
    inner: Mutex<T>,
    timeout: Duration,
    label: &'static str,
}

impl<T> TimedMutex<T> {
    pub(crate) fn new(value: T, timeout: Duration, label: &'static str) -> Self {
        Self {
            inner: Mutex::new(value),
            timeout,
            label,
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.inner.try_lock_for(self.timeout).ok_or_else(|| {
            tracing::warn!(
                lock = self.label,
                timeout_ms = self.timeout.as_millis() as u64,
                "lock wait expired"
            );
            BridgeError::Busy(self.label.to_string())
        })
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
