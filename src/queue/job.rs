//! Deferred refresh jobs and the worker that runs them.

use super::generator::{value_type_name, QueueGenerator, QueueGeneratorDescriptor};
use super::reference::ReferenceRegistry;
use super::{DetachedQueue, InMemoryQueue};
use crate::backend::{CacheBackend, Dependency};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::mutex::{KeyedMutex, NoMutex};
use crate::refresh_ahead::RefreshAhead;
use chrono::{DateTime, Utc};
use futures::future::{FutureExt, LocalBoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A queued request to regenerate one cache entry.
///
/// Carries everything a worker in another process needs: the generator
/// recipe, the key, how long to cache the result and the dependency to store
/// it with. `expires_at` bounds how late the job may run; a job that arrives
/// after it would overwrite whatever a newer reader generated with data that
/// is no longer current, so it is skipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshJob {
    pub generator: QueueGeneratorDescriptor,
    pub key: CacheKey,
    /// Data duration in seconds. `None` = store default, `0` = never expires.
    pub duration: Option<u64>,
    #[serde(default)]
    pub dependency: Option<Dependency>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RefreshJob {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::QueueError(format!("Failed to encode job: {}", e)))
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::QueueError(format!("Failed to decode job: {}", e)))
    }

    /// Data duration to pass back to the orchestrator.
    pub fn duration(&self) -> Option<Duration> {
        self.duration.map(Duration::from_secs)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// What [`RefreshWorker::execute`] did with a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job was stale and dropped without generating.
    Skipped,
    /// The entry holds a current value: generated by this job, or found in
    /// the cache after waiting for a lock holder that generated it first.
    Generated,
    /// The generator had nothing to cache; the entry was left untouched.
    NotCacheable,
}

/// Counters returned by [`RefreshWorker::run_pending`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub generated: usize,
    pub not_cacheable: usize,
    pub skipped: usize,
    pub failed: usize,
}

type Handler<D, G, M> =
    for<'a> fn(&'a RefreshWorker<D, G, M>, &'a RefreshJob) -> LocalBoxFuture<'a, Result<JobOutcome>>;

/// Executes refresh jobs against an orchestrator.
///
/// The orchestrator and registry are injected: a job only names the
/// generation method, the worker supplies everything it runs against.
///
/// One worker serves a queue shared by generators of different value types.
/// Each type is registered once with [`with_value_type`](Self::with_value_type)
/// and jobs are dispatched on the tag their descriptor carries.
pub struct RefreshWorker<D, G = D, M = NoMutex> {
    refresh_ahead: Arc<RefreshAhead<D, G, M>>,
    registry: Arc<ReferenceRegistry>,
    handlers: HashMap<String, Handler<D, G, M>>,
}

impl<D, G, M> Clone for RefreshWorker<D, G, M> {
    fn clone(&self) -> Self {
        RefreshWorker {
            refresh_ahead: Arc::clone(&self.refresh_ahead),
            registry: Arc::clone(&self.registry),
            handlers: self.handlers.clone(),
        }
    }
}

impl<D, G, M> RefreshWorker<D, G, M>
where
    D: CacheBackend + 'static,
    G: CacheBackend + 'static,
    M: KeyedMutex + 'static,
{
    pub fn new(refresh_ahead: Arc<RefreshAhead<D, G, M>>, registry: Arc<ReferenceRegistry>) -> Self {
        RefreshWorker {
            refresh_ahead,
            registry,
            handlers: HashMap::new(),
        }
    }

    /// Handle jobs whose value type is `V`, tagged with [`value_type_name`].
    pub fn with_value_type<V>(self) -> Self
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.with_value_type_named::<V>(value_type_name::<V>())
    }

    /// Handle jobs tagged `name` as values of type `V`.
    pub fn with_value_type_named<V>(mut self, name: impl Into<String>) -> Self
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Self::dispatch::<V>);
        self
    }

    pub fn handles(&self, value_type: &str) -> bool {
        self.handlers.contains_key(value_type)
    }

    pub fn refresh_ahead(&self) -> &RefreshAhead<D, G, M> {
        &self.refresh_ahead
    }

    /// Run one job with the handler registered for its value type.
    ///
    /// A stale job is dropped before anything is resolved or generated.
    /// Otherwise the generator is rebuilt from the job and handed to
    /// [`RefreshAhead::generate_and_set`], so a fresh value written in the
    /// meantime by a lock holder is kept.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the job names no value type or one
    /// this worker has no handler for, or if its generator no longer resolves
    /// against the registry. Generation errors are passed through.
    pub async fn execute(&self, job: &RefreshJob) -> Result<JobOutcome> {
        if self.skip_stale(job) {
            return Ok(JobOutcome::Skipped);
        }

        let value_type = job.generator.value_type.as_deref().ok_or_else(|| {
            Error::ConfigError(format!("refresh job for {} does not name its value type", job.key))
        })?;
        let handler = self.handlers.get(value_type).ok_or_else(|| {
            Error::ConfigError(format!("no refresh handler registered for value type {}", value_type))
        })?;

        handler(self, job).await
    }

    /// Run one job as a value of type `V`, ignoring its value-type tag.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute), minus the handler lookup.
    pub async fn execute_as<V>(&self, job: &RefreshJob) -> Result<JobOutcome>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if self.skip_stale(job) {
            return Ok(JobOutcome::Skipped);
        }
        self.generate::<V>(job).await
    }

    fn skip_stale(&self, job: &RefreshJob) -> bool {
        if !job.is_expired() {
            return false;
        }
        let key = job.key.build();
        debug!("Skipping stale refresh job for {}", key);
        self.refresh_ahead.metrics().record_stale_job(&key);
        true
    }

    fn dispatch<'a, V>(worker: &'a Self, job: &'a RefreshJob) -> LocalBoxFuture<'a, Result<JobOutcome>>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        worker.generate::<V>(job).boxed_local()
    }

    async fn generate<V>(&self, job: &RefreshJob) -> Result<JobOutcome>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let generator: QueueGenerator<DetachedQueue, V> =
            QueueGenerator::new(DetachedQueue, Arc::clone(&self.registry), job.generator.clone())?;

        let value = self
            .refresh_ahead
            .generate_and_set(&job.key, &generator, job.duration(), job.dependency.as_ref())
            .await?;

        if value.is_none() {
            debug!("Refresh job for {} produced nothing to cache", job.key);
            return Ok(JobOutcome::NotCacheable);
        }
        debug!("✓ Refresh job executed for {}", job.key);
        Ok(JobOutcome::Generated)
    }

    /// Drain `queue`, running every job. Failures are logged and counted.
    pub async fn run_pending(&self, queue: &InMemoryQueue) -> WorkerStats {
        let mut stats = WorkerStats::default();

        loop {
            let (id, job) = match queue.pop().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("⚠ Dropping undecodable refresh job: {}", e);
                    stats.failed += 1;
                    continue;
                }
            };

            match self.execute(&job).await {
                Ok(JobOutcome::Generated) => stats.generated += 1,
                Ok(JobOutcome::NotCacheable) => stats.not_cacheable += 1,
                Ok(JobOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    warn!("⚠ Refresh job {} failed: {}", id, e);
                    stats.failed += 1;
                }
            }
        }

        if stats != WorkerStats::default() {
            info!(
                "✓ Refresh worker drained queue: {} generated, {} not cacheable, {} skipped, {} failed",
                stats.generated, stats.not_cacheable, stats.skipped, stats.failed
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ReferenceDescriptor;
    use serde_json::json;

    fn job(expires_at: Option<DateTime<Utc>>) -> RefreshJob {
        RefreshJob {
            generator: QueueGeneratorDescriptor::new(ReferenceDescriptor::method("load", vec![json!(1)])),
            key: CacheKey::from(vec![CacheKey::from("user"), CacheKey::from(1)]),
            duration: Some(30),
            dependency: Some(Dependency::new(json!({"tag": "users"}))),
            expires_at,
        }
    }

    #[test]
    fn test_job_json_roundtrip_keeps_information() {
        let original = job(Some(Utc::now()));
        let decoded = RefreshJob::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        assert!(!job(None).is_expired_at(now));
        assert!(job(Some(now)).is_expired_at(now));
        assert!(!job(Some(now + chrono::Duration::seconds(5))).is_expired_at(now));
        assert!(job(Some(now - chrono::Duration::seconds(5))).is_expired());
    }

    #[test]
    fn test_malformed_job_is_queue_error() {
        assert!(matches!(
            RefreshJob::from_json("{\"key\": 1}"),
            Err(Error::QueueError(_))
        ));
    }
}
