//! Lock coordination around generation.

use crate::key::{CacheKey, KeyCodec};
use crate::mutex::KeyedMutex;
use std::time::Duration;

/// Wraps an optional [`KeyedMutex`] and derives lock names from cache keys.
///
/// Without a mutex every call is a no-op returning `false`: concurrent
/// callers may then generate the same value twice, which wastes work but
/// never stores a wrong value. Mutex failures are logged and reported as
/// "not acquired" for the same reason.
pub struct LockCoordinator<M> {
    mutex: Option<M>,
    suffix: String,
}

impl<M: KeyedMutex> LockCoordinator<M> {
    pub fn new(mutex: Option<M>, suffix: impl Into<String>) -> Self {
        LockCoordinator {
            mutex,
            suffix: suffix.into(),
        }
    }

    /// Whether a mutex is configured.
    pub fn is_enabled(&self) -> bool {
        self.mutex.is_some()
    }

    pub fn mutex(&self) -> Option<&M> {
        self.mutex.as_ref()
    }

    /// Name of the critical section guarding generation of `key`.
    pub fn lock_name(&self, key: &CacheKey) -> String {
        KeyCodec::derive(key, &self.suffix).build()
    }

    /// Take the lock for `key`.
    ///
    /// Waits up to `timeout_override`, or `default_timeout` (the generator's
    /// lock-wait policy) when no override is given.
    pub async fn acquire(
        &self,
        key: &CacheKey,
        default_timeout: Duration,
        timeout_override: Option<Duration>,
    ) -> bool {
        let Some(mutex) = &self.mutex else {
            return false;
        };

        let name = self.lock_name(key);
        let timeout = timeout_override.unwrap_or(default_timeout);

        match mutex.acquire(&name, timeout).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("⚠ Failed to acquire lock {}: {}", name, e);
                false
            }
        }
    }

    /// Release the lock for `key`.
    pub async fn release(&self, key: &CacheKey) -> bool {
        let Some(mutex) = &self.mutex else {
            return false;
        };

        let name = self.lock_name(key);
        match mutex.release(&name).await {
            Ok(released) => released,
            Err(e) => {
                warn!("⚠ Failed to release lock {}: {}", name, e);
                false
            }
        }
    }
}
