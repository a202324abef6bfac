//! Generator that defers refreshes to a job queue.

use super::job::RefreshJob;
use super::reference::{ReferenceDescriptor, ReferenceRegistry};
use super::JobQueue;
use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::generator::{Generator, RefreshRequest};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Serializable recipe for rebuilding a [`QueueGenerator`] in a worker.
///
/// ```
/// use refresh_ahead_cache::queue::QueueGeneratorDescriptor;
/// use serde_json::json;
///
/// let descriptor = QueueGeneratorDescriptor::from_json(json!({
///     "default_context": {"reference": "Catalog", "args": []},
///     "generate_value": {"reference": "load_product", "args": [42]},
///     "mutex_lock_timeout": 5
/// }))
/// .unwrap();
/// assert_eq!(descriptor.mutex_lock_timeout, 5);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueGeneratorDescriptor {
    /// Context `generate_value` falls back to when it has none of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_context: Option<ReferenceDescriptor>,

    /// Method producing the value, as JSON.
    pub generate_value: ReferenceDescriptor,

    /// Seconds to wait for the generation lock.
    #[serde(default)]
    pub mutex_lock_timeout: u64,

    /// Name of the cached value type, used by a
    /// [`RefreshWorker`](super::RefreshWorker) to pick the handler for a job.
    /// [`QueueGenerator::new`] fills it in with [`value_type_name`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

/// Default value-type tag for `V`: its Rust type name.
///
/// Only stable within one build of a program; producers and workers built
/// separately should agree on explicit names through
/// [`QueueGeneratorDescriptor::with_value_type`].
pub fn value_type_name<V>() -> String {
    std::any::type_name::<V>().to_string()
}

impl QueueGeneratorDescriptor {
    pub fn new(generate_value: ReferenceDescriptor) -> Self {
        QueueGeneratorDescriptor {
            default_context: None,
            generate_value,
            mutex_lock_timeout: 0,
            value_type: None,
        }
    }

    pub fn with_default_context(mut self, context: ReferenceDescriptor) -> Self {
        self.default_context = Some(context);
        self
    }

    pub fn with_mutex_lock_timeout(mut self, seconds: u64) -> Self {
        self.mutex_lock_timeout = seconds;
        self
    }

    pub fn with_value_type(mut self, name: impl Into<String>) -> Self {
        self.value_type = Some(name.into());
        self
    }

    /// Parse a descriptor from a JSON configuration record.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for a malformed record, including a
    /// negative or fractional `mutex_lock_timeout`.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::ConfigError(format!("invalid queue generator config: {}", e)))
    }

    /// Check that `generate_value` is a callable method known to `registry`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` describing the problem.
    pub fn validate(&self, registry: &ReferenceRegistry) -> Result<()> {
        let method = self.generate_value.name().ok_or_else(|| {
            Error::ConfigError("generate_value must reference a method by name".to_string())
        })?;

        if method.is_empty() {
            return Err(Error::ConfigError(
                "generate_value method name must not be empty".to_string(),
            ));
        }
        if !self.generate_value.has_arguments() {
            return Err(Error::ConfigError(format!(
                "generate_value {:?} needs an argument list",
                method
            )));
        }
        if !registry.has_method(method) {
            return Err(Error::ConfigError(format!(
                "generate_value {:?} is not registered",
                method
            )));
        }
        Ok(())
    }
}

/// Lifetime policy of queued refresh jobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobTtl {
    /// Use the orchestrator's generated duration.
    #[default]
    Derived,
    /// Jobs never go stale.
    Never,
    /// Fixed lifetime. Must not be zero.
    Fixed(Duration),
}

impl JobTtl {
    /// # Errors
    /// Returns `Error::ConfigError` for `Fixed(Duration::ZERO)`.
    pub fn validate(&self) -> Result<()> {
        match self {
            JobTtl::Fixed(d) if d.is_zero() => Err(Error::ConfigError(
                "fixed refresh job TTL must be positive; use JobTtl::Never to disable expiry"
                    .to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Lifetime of a job given the orchestrator's derived one.
    pub fn resolve(&self, derived: Option<Duration>) -> Option<Duration> {
        match self {
            JobTtl::Derived => derived,
            JobTtl::Never => None,
            JobTtl::Fixed(d) => Some(*d),
        }
    }
}

/// Configuration record resolved by
/// [`ensure_generator`](crate::generator::ensure_generator).
pub struct QueueGeneratorConfig<Q> {
    pub queue: Option<Q>,
    pub registry: Arc<ReferenceRegistry>,
    /// JSON form of a [`QueueGeneratorDescriptor`].
    pub descriptor: serde_json::Value,
    pub job_ttl: JobTtl,
}

/// Generator that computes in process on a miss and queues a
/// [`RefreshJob`] when a refresh is due.
///
/// `generate` never goes through the queue: the caller is waiting for the
/// value. `refresh` reports `false` when the push fails, so the guard is
/// dropped and a later reader retries.
pub struct QueueGenerator<Q, V> {
    queue: Q,
    registry: Arc<ReferenceRegistry>,
    descriptor: QueueGeneratorDescriptor,
    job_ttl: JobTtl,
    _value: PhantomData<fn() -> V>,
}

impl<Q: JobQueue, V> QueueGenerator<Q, V> {
    /// # Errors
    /// Returns `Error::ConfigError` if the descriptor does not validate
    /// against `registry`.
    pub fn new(
        queue: Q,
        registry: Arc<ReferenceRegistry>,
        mut descriptor: QueueGeneratorDescriptor,
    ) -> Result<Self> {
        descriptor.validate(&registry)?;
        if descriptor.value_type.is_none() {
            descriptor.value_type = Some(value_type_name::<V>());
        }
        Ok(QueueGenerator {
            queue,
            registry,
            descriptor,
            job_ttl: JobTtl::Derived,
            _value: PhantomData,
        })
    }

    /// Build from a configuration record.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the queue is missing or the descriptor
    /// or TTL policy is invalid.
    pub fn from_config(config: QueueGeneratorConfig<Q>) -> Result<Self> {
        let queue = config.queue.ok_or_else(|| {
            Error::ConfigError("queue generator requires a queue".to_string())
        })?;
        let descriptor = QueueGeneratorDescriptor::from_json(config.descriptor)?;
        Self::new(queue, config.registry, descriptor)?.with_job_ttl(config.job_ttl)
    }

    /// # Errors
    /// Returns `Error::ConfigError` for `JobTtl::Fixed(Duration::ZERO)`.
    pub fn with_job_ttl(mut self, job_ttl: JobTtl) -> Result<Self> {
        job_ttl.validate()?;
        self.job_ttl = job_ttl;
        Ok(self)
    }

    pub fn descriptor(&self) -> &QueueGeneratorDescriptor {
        &self.descriptor
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn job_ttl(&self) -> JobTtl {
        self.job_ttl
    }

    /// The job that `refresh` would push for `request`.
    pub fn build_job(&self, request: &RefreshRequest) -> RefreshJob {
        let expires_at = self
            .job_ttl
            .resolve(request.job_ttl)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));

        RefreshJob {
            generator: self.descriptor.clone(),
            key: request.key.clone(),
            duration: request.duration.map(ceil_secs),
            dependency: request.dependency.clone(),
            expires_at,
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

impl<B, Q, V> Generator<B> for QueueGenerator<Q, V>
where
    B: CacheBackend,
    Q: JobQueue,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    type Value = V;

    fn mutex_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.descriptor.mutex_lock_timeout)
    }

    async fn generate(&self, _cache: &B) -> Result<Option<V>> {
        let value = self
            .descriptor
            .generate_value
            .invoke_as_method(&self.registry, self.descriptor.default_context.as_ref())
            .await?;

        if value.is_null() {
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::GenerationError(format!("generated value has the wrong shape: {}", e)))
    }

    async fn refresh(&self, _cache: &B, request: &RefreshRequest) -> bool {
        let job = self.build_job(request);

        match self.queue.push(&job).await {
            Ok(id) => {
                debug!("✓ Queued refresh job {} for {}", id, request.key);
                true
            }
            Err(e) => {
                warn!("⚠ Failed to queue refresh job for {}: {}", request.key, e);
                false
            }
        }
    }
}
