//! Memcached cache backend implementation.
//!
//! `add` uses the native memcached `add` command, which is atomic on the
//! server. Dependencies are accepted but not persisted.

use super::{CacheBackend, Dependency};
use crate::error::{Error, Result};
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Object, Pool};
use std::time::Duration;

/// Default Memcached connection pool size.
/// Override with MEMCACHED_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Configuration for Memcached backend.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub servers: Vec<String>, // e.g., ["localhost:11211"]
    pub pool_size: u32,
    /// Duration applied to writes that do not carry one. `None` = no expiry.
    pub default_ttl: Option<Duration>,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec!["localhost:11211".to_string()],
            pool_size: DEFAULT_POOL_SIZE,
            default_ttl: None,
        }
    }
}

/// Memcached backend with deadpool connection pooling.
///
/// # Example
///
/// ```no_run
/// # use refresh_ahead_cache::backend::{MemcachedBackend, MemcachedConfig, CacheBackend};
/// # use refresh_ahead_cache::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = MemcachedBackend::new(MemcachedConfig::default()).await?;
/// backend.set("key", b"value".to_vec(), None, None).await?;
/// let value = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemcachedBackend {
    pool: Pool,
    default_ttl: Option<Duration>,
}

impl MemcachedBackend {
    /// Create new Memcached backend from configuration.
    ///
    /// Only the first server of the list is used.
    ///
    /// # Errors
    /// Returns `Err` if no server is configured or pool creation fails
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        let addr = config
            .servers
            .first()
            .ok_or_else(|| Error::ConfigError("No memcached servers specified".to_string()))?
            .clone();

        let pool = Pool::builder(Manager::new(addr.clone()))
            .max_size(config.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Memcached backend initialized with server: {} (pool size: {})",
            addr, config.pool_size
        );

        Ok(MemcachedBackend {
            pool,
            default_ttl: config.default_ttl.filter(|d| !d.is_zero()),
        })
    }

    /// Create from server address directly.
    ///
    /// Pool size comes from `MEMCACHED_POOL_SIZE` when set, otherwise 16.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub async fn from_server(addr: String) -> Result<Self> {
        let pool_size = std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        Self::new(MemcachedConfig {
            servers: vec![addr],
            pool_size,
            ..Default::default()
        })
        .await
    }

    async fn connection(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to get Memcached connection: {}", e)))
    }
}

/// Memcached expiry in seconds. Sub-second durations round up so they do
/// not turn into "never expires" (0).
fn expiration(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| {
        let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
        secs.max(1) as i64
    })
}

impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        match conn.get(key).await {
            Ok(Some(value)) => {
                debug!("✓ Memcached GET {} -> HIT", key);
                Ok(value.data)
            }
            Ok(None) => {
                debug!("✓ Memcached GET {} -> MISS", key);
                Ok(None)
            }
            Err(e) => Err(Error::BackendError(format!(
                "Memcached GET failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        _dependency: Option<&Dependency>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.set(key, value.as_slice(), expiration(ttl), None)
            .await
            .map_err(|e| {
                Error::BackendError(format!("Memcached SET failed for key {}: {}", key, e))
            })?;

        debug!("✓ Memcached SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        _dependency: Option<&Dependency>,
    ) -> Result<bool> {
        let mut conn = self.connection().await?;

        match conn.add(key, value.as_slice(), expiration(ttl), None).await {
            Ok(()) => {
                debug!("✓ Memcached ADD {} -> STORED", key);
                Ok(true)
            }
            Err(e) => {
                let err_msg = e.to_string().to_lowercase();
                if err_msg.contains("not stored") || err_msg.contains("notstored") {
                    debug!("✓ Memcached ADD {} -> EXISTS", key);
                    Ok(false)
                } else {
                    Err(Error::BackendError(format!(
                        "Memcached ADD failed for key {}: {}",
                        key, e
                    )))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        match conn.delete(key).await {
            Ok(()) => {}
            // deleting an absent key is not an error for callers
            Err(e) if e.to_string().to_lowercase().contains("not found") => {}
            Err(e) => {
                return Err(Error::BackendError(format!(
                    "Memcached DELETE failed for key {}: {}",
                    key, e
                )))
            }
        }

        debug!("✓ Memcached DELETE {}", key);
        Ok(())
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => Ok(conn.get("__health_check__").await.is_ok()),
            Err(_) => Ok(false),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.flush_all()
            .await
            .map_err(|e| Error::BackendError(format!("Memcached FLUSH_ALL failed: {}", e)))?;

        warn!("⚠ Memcached FLUSH_ALL executed - all cache cleared!");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memcached_config_default() {
        let config = MemcachedConfig::default();
        assert_eq!(config.servers, vec!["localhost:11211".to_string()]);
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.default_ttl, None);
    }

    #[test]
    fn test_expiration_rounds_up() {
        assert_eq!(expiration(None), None);
        assert_eq!(expiration(Some(Duration::from_secs(5))), Some(5));
        assert_eq!(expiration(Some(Duration::from_millis(1500))), Some(2));
        assert_eq!(expiration(Some(Duration::from_millis(1))), Some(1));
    }

    #[tokio::test]
    async fn test_memcached_backend_requires_server() {
        let config = MemcachedConfig {
            servers: vec![],
            ..Default::default()
        };

        let result = MemcachedBackend::new(config).await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    // Require a running memcached server: cargo test --features memcached -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_memcached_backend_add_only_when_absent() {
        let backend = MemcachedBackend::from_server("localhost:11211".to_string())
            .await
            .expect("Failed to create backend");
        backend.delete("add_key").await.expect("Failed to delete");

        assert!(backend
            .add("add_key", b"1".to_vec(), Some(Duration::from_secs(5)), None)
            .await
            .expect("Failed to add"));
        assert!(!backend
            .add("add_key", b"2".to_vec(), Some(Duration::from_secs(5)), None)
            .await
            .expect("Failed to add"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_memcached_backend_set_get() {
        let backend = MemcachedBackend::from_server("localhost:11211".to_string())
            .await
            .expect("Failed to create backend");

        backend
            .set("test_key", b"test_value".to_vec(), None, None)
            .await
            .expect("Failed to set");

        let result = backend.get("test_key").await.expect("Failed to get");
        assert_eq!(result, Some(b"test_value".to_vec()));
    }
}
