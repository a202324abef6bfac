//! Deferred refresh through a job queue.
//!
//! A [`QueueGenerator`] answers misses in process but turns refreshes into
//! [`RefreshJob`]s pushed onto a [`JobQueue`]. A [`RefreshWorker`] elsewhere
//! pops them, rebuilds the generator from the job's
//! [`QueueGeneratorDescriptor`] against its own [`ReferenceRegistry`], and
//! writes the fresh value through
//! [`RefreshAhead::generate_and_set`](crate::RefreshAhead::generate_and_set).
//! Jobs carry a value-type tag, so one queue can feed a worker for several
//! generator value types.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod generator;
pub mod job;
pub mod reference;
#[cfg(feature = "redis")]
pub mod redis;

pub use generator::{
    value_type_name, JobTtl, QueueGenerator, QueueGeneratorConfig, QueueGeneratorDescriptor,
};
pub use job::{JobOutcome, RefreshJob, RefreshWorker, WorkerStats};
pub use reference::{
    decode_arg, Arg, Construction, Instance, Reference, ReferenceDescriptor, ReferenceRegistry,
    Resolved,
};
#[cfg(feature = "redis")]
pub use redis::RedisQueue;

/// Identifier assigned to a pushed job.
pub type JobId = String;

pub(crate) fn next_job_id() -> JobId {
    Uuid::now_v7().to_string()
}

/// Destination for refresh jobs.
#[allow(async_fn_in_trait)]
pub trait JobQueue: Send + Sync {
    /// Enqueue `job`.
    ///
    /// # Errors
    /// Returns `Error::QueueError` if the job could not be accepted.
    async fn push(&self, job: &RefreshJob) -> Result<JobId>;
}

/// Process-local FIFO queue. Jobs are stored in their JSON wire form so a
/// job that cannot be encoded is rejected at push time, as it would be by a
/// remote queue.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    jobs: Arc<Mutex<VecDeque<(JobId, String)>>>,
    capacity: Option<usize>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that rejects pushes once `capacity` jobs are waiting.
    pub fn with_capacity(capacity: usize) -> Self {
        InMemoryQueue {
            jobs: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: Some(capacity),
        }
    }

    /// Take the oldest job.
    ///
    /// # Errors
    /// Returns `Error::QueueError` if the stored payload no longer decodes;
    /// the job is consumed either way.
    pub async fn pop(&self) -> Result<Option<(JobId, RefreshJob)>> {
        let Some((id, payload)) = self.jobs.lock().await.pop_front() else {
            return Ok(None);
        };
        let job = RefreshJob::from_json(&payload)?;
        Ok(Some((id, job)))
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

impl JobQueue for InMemoryQueue {
    async fn push(&self, job: &RefreshJob) -> Result<JobId> {
        let payload = job.to_json()?;
        let mut jobs = self.jobs.lock().await;

        if let Some(capacity) = self.capacity {
            if jobs.len() >= capacity {
                return Err(Error::QueueError(format!(
                    "queue is full ({} jobs waiting)",
                    capacity
                )));
            }
        }

        let id = next_job_id();
        jobs.push_back((id.clone(), payload));
        debug!("✓ Job {} queued ({} waiting)", id, jobs.len());
        Ok(id)
    }
}

/// Queue that accepts nothing.
///
/// Used where a queue generator only ever generates, such as inside a
/// worker: refreshing from there would requeue the job it is running.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedQueue;

impl JobQueue for DetachedQueue {
    async fn push(&self, _job: &RefreshJob) -> Result<JobId> {
        Err(Error::QueueError(
            "detached queue does not accept jobs".to_string(),
        ))
    }
}
