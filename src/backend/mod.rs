//! Cache backend implementations.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "memcached")]
pub use memcached::{MemcachedBackend, MemcachedConfig};
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Opaque invalidation descriptor attached to a cache entry.
///
/// The orchestrator never interprets it: it is handed to the store on every
/// write and carried inside deferred refresh jobs so the worker writes the
/// regenerated value with the same dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dependency(serde_json::Value);

impl Dependency {
    pub fn new(value: serde_json::Value) -> Self {
        Dependency(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for Dependency {
    fn from(value: serde_json::Value) -> Self {
        Dependency(value)
    }
}

/// Trait for cache backend implementations.
///
/// Both the data cache and the guard cache of a
/// [`RefreshAhead`](crate::RefreshAhead) are `CacheBackend`s, and they may be
/// the same instance.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations should use interior mutability (RwLock, Mutex, or external storage).
///
/// **TTL:** `ttl = None` means the entry never expires. Callers resolve the
/// store's [`default_ttl`](CacheBackend::default_ttl) before writing.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve value from cache by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found in cache
    /// - `Ok(None)` - Cache miss (key not found or expired)
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value in cache, replacing any existing entry.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<()>;

    /// Store value only if the key is absent (or its entry has expired).
    ///
    /// Must be atomic: of any number of concurrent `add` calls for the same
    /// key, at most one returns `Ok(true)`. The refresh-ahead guard relies on
    /// this being true across processes for shared stores.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<bool>;

    /// Remove value from cache.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove `key` only while it still holds `expected`.
    ///
    /// Returns whether the entry was removed. The default reads, compares and
    /// then deletes in two round trips; stores shared between processes
    /// should override it with an atomic compare-and-delete.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        match self.get(key).await? {
            Some(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Check if key exists in cache (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Duration used when a caller does not pass one.
    ///
    /// `None` (the default) means entries written without an explicit
    /// duration never expire, which also disables refresh-ahead for them.
    fn default_ttl(&self) -> Option<Duration> {
        None
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Optional: Clear all cache (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    async fn clear_all(&self) -> Result<()> {
        Err(crate::error::Error::NotImplemented(
            "clear_all not implemented for this backend".to_string(),
        ))
    }
}
