//! Generators: how a value is computed and how a refresh is started.
//!
//! A [`Generator`] bundles three capabilities:
//!
//! - `generate`: compute the value now, on the caller's task (miss path)
//! - `refresh`: start a regeneration out of band and report whether it was
//!   started (refresh-ahead path)
//! - `mutex_lock_timeout`: how long a miss may wait for the generation lock
//!
//! Two variants ship with the crate: [`CallableGenerator`] runs closures in
//! process, [`QueueGenerator`](crate::queue::QueueGenerator) defers refreshes
//! to a job queue. [`ensure_generator`] resolves the accepted input shapes into
//! an [`AnyGenerator`].

use crate::backend::{CacheBackend, Dependency};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::queue::{InMemoryQueue, JobQueue, QueueGenerator, QueueGeneratorConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub mod callable;

pub use callable::{generate_fn, refresh_fn, CallableGenerator, GenerateFn, InProcessConfig, RefreshFn};

/// What a refresh has to regenerate.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshRequest {
    pub key: CacheKey,
    /// Data duration as passed by the caller (`None` = store default).
    pub duration: Option<Duration>,
    pub dependency: Option<Dependency>,
    /// How long a deferred refresh stays worth running. `None` = no limit.
    pub job_ttl: Option<Duration>,
}

/// Capability set the orchestrator needs from a generator.
///
/// `B` is the data cache handed to `generate` and `refresh`.
#[allow(async_fn_in_trait)]
pub trait Generator<B: CacheBackend>: Send + Sync {
    type Value: Serialize + DeserializeOwned + Send + Sync;

    /// Upper bound on waiting for the generation lock.
    fn mutex_lock_timeout(&self) -> Duration;

    /// Compute the value synchronously.
    ///
    /// `Ok(None)` means "nothing to cache": the orchestrator writes nothing and
    /// returns `None` to its caller.
    async fn generate(&self, cache: &B) -> Result<Option<Self::Value>>;

    /// Start an out-of-band refresh. `false` means it could not be started.
    async fn refresh(&self, cache: &B, request: &RefreshRequest) -> bool;
}

/// A resolved generator of either built-in variant.
pub enum AnyGenerator<B, V, Q = InMemoryQueue> {
    Callable(CallableGenerator<B, V>),
    Queue(QueueGenerator<Q, V>),
}

impl<B, V, Q> Generator<B> for AnyGenerator<B, V, Q>
where
    B: CacheBackend + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    Q: JobQueue,
{
    type Value = V;

    fn mutex_lock_timeout(&self) -> Duration {
        match self {
            AnyGenerator::Callable(g) => Generator::<B>::mutex_lock_timeout(g),
            AnyGenerator::Queue(g) => Generator::<B>::mutex_lock_timeout(g),
        }
    }

    async fn generate(&self, cache: &B) -> Result<Option<V>> {
        match self {
            AnyGenerator::Callable(g) => g.generate(cache).await,
            AnyGenerator::Queue(g) => g.generate(cache).await,
        }
    }

    async fn refresh(&self, cache: &B, request: &RefreshRequest) -> bool {
        match self {
            AnyGenerator::Callable(g) => g.refresh(cache, request).await,
            AnyGenerator::Queue(g) => g.refresh(cache, request).await,
        }
    }
}

/// Input shapes accepted by [`ensure_generator`].
pub enum GeneratorSource<B, V, Q = InMemoryQueue> {
    /// An already-built generator, used as-is.
    Generator(AnyGenerator<B, V, Q>),
    /// A bare generate function: no refresh, no lock wait.
    Function(GenerateFn<B, V>),
    /// An in-process configuration record.
    InProcess(InProcessConfig<B, V>),
    /// A queue-deferred configuration record.
    Queue(QueueGeneratorConfig<Q>),
}

impl<B, V, Q> From<CallableGenerator<B, V>> for GeneratorSource<B, V, Q> {
    fn from(generator: CallableGenerator<B, V>) -> Self {
        GeneratorSource::Generator(AnyGenerator::Callable(generator))
    }
}

impl<B, V, Q> From<QueueGenerator<Q, V>> for GeneratorSource<B, V, Q> {
    fn from(generator: QueueGenerator<Q, V>) -> Self {
        GeneratorSource::Generator(AnyGenerator::Queue(generator))
    }
}

impl<B, V, Q> From<InProcessConfig<B, V>> for GeneratorSource<B, V, Q> {
    fn from(config: InProcessConfig<B, V>) -> Self {
        GeneratorSource::InProcess(config)
    }
}

impl<B, V, Q> From<QueueGeneratorConfig<Q>> for GeneratorSource<B, V, Q> {
    fn from(config: QueueGeneratorConfig<Q>) -> Self {
        GeneratorSource::Queue(config)
    }
}

/// Resolve any accepted generator shape into a usable generator.
///
/// # Errors
///
/// Returns `Error::ConfigError` when no generate capability resolves: an
/// in-process record without `generate`, or a queue record without a queue,
/// with a malformed descriptor, or naming methods the registry does not know.
pub fn ensure_generator<B, V, Q>(source: GeneratorSource<B, V, Q>) -> Result<AnyGenerator<B, V, Q>>
where
    B: CacheBackend + 'static,
    V: Send + 'static,
    Q: JobQueue,
{
    match source {
        GeneratorSource::Generator(generator) => Ok(generator),
        GeneratorSource::Function(generate) => {
            Ok(AnyGenerator::Callable(CallableGenerator::from_fn(generate)))
        }
        GeneratorSource::InProcess(config) => {
            let generate = config.generate.ok_or_else(|| {
                Error::ConfigError("in-process generator requires a generate function".to_string())
            })?;

            let mut generator = CallableGenerator::from_fn(generate)
                .with_mutex_lock_timeout(Duration::from_secs(config.mutex_lock_timeout));
            if let Some(refresh) = config.refresh {
                generator = generator.with_refresh_fn(refresh);
            }
            Ok(AnyGenerator::Callable(generator))
        }
        GeneratorSource::Queue(config) => Ok(AnyGenerator::Queue(QueueGenerator::from_config(config)?)),
    }
}
