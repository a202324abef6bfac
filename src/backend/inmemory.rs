//! In-memory cache backend (default, thread-safe, async).
//!
//! Uses DashMap for concurrent access with per-key sharding. Expiry is
//! checked on access against `tokio::time::Instant`, so tests running on a
//! paused tokio clock can advance time past a TTL without sleeping.

use super::{CacheBackend, Dependency};
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory cache entry with optional expiration.
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    dependency: Option<Dependency>,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>, dependency: Option<&Dependency>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        CacheEntry {
            data,
            expires_at,
            dependency: dependency.cloned(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Thread-safe async in-memory cache backend.
///
/// `add` goes through DashMap's entry API, which holds the shard lock for the
/// whole check-and-insert, so it is atomic within the process.
///
/// # Example
///
/// ```no_run
/// use refresh_ahead_cache::backend::{InMemoryBackend, CacheBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new().with_default_ttl(Duration::from_secs(60));
///
///     backend.set("key1", b"value".to_vec(), None, None).await?;
///     assert!(backend.get("key1").await?.is_some());
///
///     // add only succeeds for absent keys
///     assert!(!backend.add("key1", b"other".to_vec(), None, None).await?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, CacheEntry>>,
    default_ttl: Option<Duration>,
}

impl InMemoryBackend {
    /// Create a new in-memory cache backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            default_ttl: None,
        }
    }

    /// Set the duration applied when callers do not pass one.
    ///
    /// A zero duration is treated as "no default".
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Get the current number of entries in cache, including expired
    /// entries that have not been touched since they expired (see
    /// [`purge_expired`](Self::purge_expired)).
    pub async fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Dependency recorded with a live entry.
    pub async fn dependency_of(&self, key: &str) -> Option<Dependency> {
        self.store
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.dependency.clone())
    }

    /// Remaining lifetime of a live entry. `Some(None)` means it never expires.
    pub async fn ttl_of(&self, key: &str) -> Option<Option<Duration>> {
        let entry = self.store.get(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(
            entry
                .expires_at
                .map(|exp| exp.saturating_duration_since(Instant::now())),
        )
    }

    /// Drop every expired entry and return how many were removed.
    ///
    /// Expiry is otherwise only enforced when a key is read again, so guard
    /// and lock entries of keys nobody reads any more stay in the map until
    /// this runs.
    pub async fn purge_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let purged = before.saturating_sub(self.store.len());
        if purged > 0 {
            debug!("✓ InMemory PURGE removed {} expired entries", purged);
        }
        purged
    }

    /// Get memory statistics.
    pub async fn stats(&self) -> CacheStats {
        let total_bytes: usize = self.store.iter().map(|entry| entry.data.len()).sum();
        let expired_count = self.store.iter().filter(|entry| entry.is_expired()).count();

        CacheStats {
            total_entries: self.store.len(),
            expired_entries: expired_count,
            total_bytes,
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
        }

        // Only drop the entry if it is still the expired one; a concurrent
        // writer may have replaced it in the meantime.
        self.store.remove_if(key, |_, entry| entry.is_expired());
        debug!("✓ InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<()> {
        let entry = CacheEntry::new(value, ttl, dependency);
        self.store.insert(key.to_string(), entry);

        if let Some(d) = ttl {
            debug!("✓ InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ InMemory SET {}", key);
        }

        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<bool> {
        let added = match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CacheEntry::new(value, ttl, dependency));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value, ttl, dependency));
                true
            }
        };

        debug!(
            "✓ InMemory ADD {} -> {}",
            key,
            if added { "STORED" } else { "EXISTS" }
        );
        Ok(added)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let removed = self
            .store
            .remove_if(key, |_, entry| !entry.is_expired() && entry.data == expected)
            .is_some();
        debug!("✓ InMemory DELETE_IF_EQ {} -> {}", key, removed);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(entry) = self.store.get(key) {
            return Ok(!entry.is_expired());
        }

        Ok(false)
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn clear_all(&self) -> Result<()> {
        self.store.clear();
        warn!("⚠ InMemory CLEAR_ALL executed - all cache cleared!");
        Ok(())
    }
}

/// Cache statistics.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}
