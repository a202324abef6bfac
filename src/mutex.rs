//! Named mutual-exclusion primitives used to serialize generation.
//!
//! A [`KeyedMutex`] guards a critical section identified by a lock name.
//! [`InMemoryMutex`] only excludes tasks of the same process;
//! [`BackendMutex`] builds a cross-process lock on top of any
//! [`CacheBackend::add`], so two processes sharing a Redis or Memcached store
//! also exclude each other.

use crate::backend::CacheBackend;
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Delay between two acquisition attempts while waiting for a lock.
pub const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Default lifetime of a [`BackendMutex`] lock entry.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// A mutex addressed by name.
#[allow(async_fn_in_trait)]
pub trait KeyedMutex: Send + Sync {
    /// Try to take `name`, waiting up to `timeout`.
    ///
    /// A zero timeout makes exactly one attempt. Returns `Ok(false)` when the
    /// lock is still held by someone else once the timeout elapsed.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool>;

    /// Release `name`. Returns `Ok(false)` if it was not held.
    async fn release(&self, name: &str) -> Result<bool>;
}

/// Placeholder mutex type for orchestrators built without one.
///
/// Uninhabited: an `Option<NoMutex>` is always `None`.
#[derive(Clone, Copy, Debug)]
pub enum NoMutex {}

impl KeyedMutex for NoMutex {
    async fn acquire(&self, _name: &str, _timeout: Duration) -> Result<bool> {
        match *self {}
    }

    async fn release(&self, _name: &str) -> Result<bool> {
        match *self {}
    }
}

/// Runs `attempt` until it succeeds or `timeout` elapses.
async fn poll_until<F, Fut>(timeout: Duration, mut attempt: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if attempt().await? {
            return Ok(true);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(RETRY_DELAY.min(deadline - now)).await;
    }
}

/// Process-local mutex. Clones share the same lock table.
#[derive(Clone, Default)]
pub struct InMemoryMutex {
    held: Arc<DashMap<String, ()>>,
}

impl InMemoryMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held.
    pub fn is_locked(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }
}

impl KeyedMutex for InMemoryMutex {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool> {
        let acquired = poll_until(timeout, move || async move {
            Ok(match self.held.entry(name.to_string()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(vacant) => {
                    vacant.insert(());
                    true
                }
            })
        })
        .await?;

        debug!("✓ Mutex ACQUIRE {} -> {}", name, acquired);
        Ok(acquired)
    }

    async fn release(&self, name: &str) -> Result<bool> {
        let released = self.held.remove(name).is_some();
        debug!("✓ Mutex RELEASE {} -> {}", name, released);
        Ok(released)
    }
}

/// Cross-process mutex stored in a cache backend.
///
/// A lock is an entry written with [`CacheBackend::add`] whose value is a
/// token unique to the acquisition. The entry carries a safety TTL so a
/// crashed holder cannot block a name forever. Release deletes the entry only
/// while it still holds this instance's token: a holder that outlived its TTL
/// leaves the lock to whoever took it over.
#[derive(Clone)]
pub struct BackendMutex<B: CacheBackend> {
    backend: B,
    lock_ttl: Duration,
    held: Arc<DashMap<String, Vec<u8>>>,
}

impl<B: CacheBackend> BackendMutex<B> {
    pub fn new(backend: B) -> Self {
        BackendMutex {
            backend,
            lock_ttl: DEFAULT_LOCK_TTL,
            held: Arc::new(DashMap::new()),
        }
    }

    /// Lifetime of lock entries. Zero is ignored.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.lock_ttl = ttl;
        }
        self
    }
}

impl<B: CacheBackend> KeyedMutex for BackendMutex<B> {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool> {
        let token = Uuid::now_v7().as_bytes().to_vec();
        let attempt = token.clone();
        let acquired = poll_until(timeout, move || {
            self.backend.add(name, attempt.clone(), Some(self.lock_ttl), None)
        })
        .await?;

        if acquired {
            self.held.insert(name.to_string(), token);
        }
        debug!("✓ Backend mutex ACQUIRE {} -> {}", name, acquired);
        Ok(acquired)
    }

    async fn release(&self, name: &str) -> Result<bool> {
        let Some((_, token)) = self.held.remove(name) else {
            return Ok(false);
        };

        let released = self.backend.delete_if_eq(name, &token).await?;
        if released {
            debug!("✓ Backend mutex RELEASE {}", name);
        } else {
            warn!("⚠ Backend mutex {} expired before release, leaving it to the current holder", name);
        }
        Ok(released)
    }
}
