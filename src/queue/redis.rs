//! Redis list as a refresh job queue.
//!
//! Jobs are pushed with `RPUSH` as a JSON envelope `{"id": ..., "job": ...}`
//! and taken with `LPOP`, so workers in any process sharing the list consume
//! them in FIFO order.

use super::{next_job_id, JobId, JobQueue, RefreshJob};
use crate::backend::RedisBackend;
use crate::error::{Error, Result};
use deadpool_redis::{redis::AsyncCommands, Connection, Pool};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct QueuedJob {
    id: JobId,
    job: RefreshJob,
}

/// Job queue backed by a Redis list.
#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
    list: String,
}

impl RedisQueue {
    pub fn new(pool: Pool, list: impl Into<String>) -> Self {
        RedisQueue {
            pool,
            list: list.into(),
        }
    }

    /// Share the connection pool of an existing backend.
    pub fn from_backend(backend: &RedisBackend, list: impl Into<String>) -> Self {
        Self::new(backend.pool().clone(), list)
    }

    pub fn list(&self) -> &str {
        &self.list
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::QueueError(format!("Failed to get Redis connection: {}", e)))
    }

    /// Take the oldest job.
    ///
    /// # Errors
    /// Returns `Error::QueueError` on connection failure or when the popped
    /// payload does not decode.
    pub async fn pop(&self) -> Result<Option<(JobId, RefreshJob)>> {
        let mut conn = self.connection().await?;

        let payload: Option<String> = conn
            .lpop(&self.list, None)
            .await
            .map_err(|e| Error::QueueError(format!("Redis LPOP failed for {}: {}", self.list, e)))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let queued: QueuedJob = serde_json::from_str(&payload)
            .map_err(|e| Error::QueueError(format!("Failed to decode job from {}: {}", self.list, e)))?;
        Ok(Some((queued.id, queued.job)))
    }

    pub async fn len(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        conn.llen(&self.list)
            .await
            .map_err(|e| Error::QueueError(format!("Redis LLEN failed for {}: {}", self.list, e)))
    }
}

impl JobQueue for RedisQueue {
    async fn push(&self, job: &RefreshJob) -> Result<JobId> {
        let queued = QueuedJob {
            id: next_job_id(),
            job: job.clone(),
        };
        let payload = serde_json::to_string(&queued)
            .map_err(|e| Error::QueueError(format!("Failed to encode job: {}", e)))?;

        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(&self.list, payload)
            .await
            .map_err(|e| Error::QueueError(format!("Redis RPUSH failed for {}: {}", self.list, e)))?;

        debug!("✓ Redis job {} pushed to {}", queued.id, self.list);
        Ok(queued.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RedisConfig;
    use crate::key::CacheKey;
    use crate::queue::{QueueGeneratorDescriptor, ReferenceDescriptor};

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_queue_push_pop() {
        let backend = RedisBackend::new(RedisConfig::default())
            .await
            .expect("Failed to connect to Redis");
        let queue = RedisQueue::from_backend(&backend, "refresh-ahead-test-jobs");
        while queue.pop().await.expect("Failed to drain").is_some() {}

        let job = RefreshJob {
            generator: QueueGeneratorDescriptor::new(ReferenceDescriptor::method("load", vec![])),
            key: CacheKey::from("redis-queue"),
            duration: Some(10),
            dependency: None,
            expires_at: None,
        };

        let id = queue.push(&job).await.expect("Failed to push");
        assert_eq!(queue.len().await.expect("Failed to count"), 1);

        let (popped_id, popped) = queue.pop().await.expect("Failed to pop").expect("job queued");
        assert_eq!(popped_id, id);
        assert_eq!(popped, job);
    }
}
