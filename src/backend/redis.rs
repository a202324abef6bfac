//! Redis cache backend implementation.
//!
//! `add` maps to `SET key value NX PX ttl`, which Redis executes atomically,
//! so guard keys written through this backend are safe across processes.
//! Dependencies are accepted but not persisted; Redis has no tag support.

use super::{CacheBackend, Dependency};
use crate::error::{Error, Result};
use deadpool_redis::{redis::AsyncCommands, Config as PoolConfig, Connection, Pool, Runtime};
use std::time::Duration;

/// Compare-and-delete in one round trip.
const DELETE_IF_EQ_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Pool statistics information.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Default Redis connection pool size.
/// Override with REDIS_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    /// Duration applied to writes that do not carry one. `None` = no expiry.
    pub default_ttl: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_POOL_SIZE,
            default_ttl: None,
        }
    }
}

impl RedisConfig {
    /// Build Redis connection string.
    pub fn connection_string(&self) -> String {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => format!(
                "redis://{}:{}@{}:{}/{}",
                username, password, self.host, self.port, self.database
            ),
            (None, Some(password)) => format!(
                "redis://default:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

/// Redis backend with deadpool connection pooling.
///
/// # Example
///
/// ```no_run
/// # use refresh_ahead_cache::backend::{RedisBackend, RedisConfig, CacheBackend};
/// # use refresh_ahead_cache::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(RedisConfig::default()).await?;
///
/// backend.set("key", b"value".to_vec(), None, None).await?;
/// let value = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    default_ttl: Option<Duration>,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = Self::build_pool(&config.connection_string(), config.pool_size)?;

        info!(
            "✓ Redis backend initialized: {}:{}",
            config.host, config.port
        );

        Ok(RedisBackend {
            pool,
            default_ttl: config.default_ttl.filter(|d| !d.is_zero()),
        })
    }

    /// Create from connection string directly.
    ///
    /// Pool size comes from `REDIS_POOL_SIZE` when set, otherwise 16.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let pool = Self::build_pool(conn_str, pool_size)?;

        info!(
            "✓ Redis backend initialized from connection string (pool size: {})",
            pool_size
        );

        Ok(RedisBackend {
            pool,
            default_ttl: None,
        })
    }

    /// Set the duration used for writes without an explicit one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Get current pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    /// Shared pool, also used by [`RedisQueue`](crate::queue::RedisQueue).
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn build_pool(conn_str: &str, pool_size: u32) -> Result<Pool> {
        let mut cfg = PoolConfig::from_url(conn_str);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size as usize));

        cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to get Redis connection: {}", e)))
    }
}

/// Millisecond expiry for `PX`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::BackendError(format!("Redis GET failed for key {}: {}", key, e)))?;

        debug!(
            "✓ Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        _dependency: Option<&Dependency>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;

        let mut cmd = deadpool_redis::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(duration) = ttl {
            cmd.arg("PX").arg(ttl_millis(duration));
        }

        cmd.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis SET failed for key {}: {}", key, e)))?;

        debug!("✓ Redis SET {} (TTL: {:?})", key, ttl);
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

        let mut cmd = deadpool_redis::redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(duration) = ttl {
            cmd.arg("PX").arg(ttl_millis(duration));
        }

        // SET NX replies OK when stored and nil when the key already exists
        let reply: Option<String> = cmd
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis SET NX failed for key {}: {}", key, e)))?;

        let added = reply.is_some();
        debug!(
            "✓ Redis ADD {} -> {}",
            key,
            if added { "STORED" } else { "EXISTS" }
        );
        Ok(added)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::BackendError(format!("Redis DEL failed for key {}: {}", key, e)))?;

        debug!("✓ Redis DELETE {}", key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.connection().await?;

        let removed: i64 = deadpool_redis::redis::Script::new(DELETE_IF_EQ_SCRIPT)
            .key(key)
            .arg(expected.to_vec())
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis DELETE_IF_EQ failed for key {}: {}", key, e)))?;

        debug!("✓ Redis DELETE_IF_EQ {} -> {}", key, removed == 1);
        Ok(removed == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        conn.exists(key).await.map_err(|e| {
            Error::BackendError(format!("Redis EXISTS failed for key {}: {}", key, e))
        })
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection().await?;

        let pong: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis PING failed: {}", e)))?;

        Ok(pong.contains("PONG"))
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;

        deadpool_redis::redis::cmd("FLUSHDB")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis FLUSHDB failed: {}", e)))?;

        warn!("⚠ Redis FLUSHDB executed - all cache cleared!");
        Ok(())
    }
}
