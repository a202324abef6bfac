//! Refresh-ahead orchestrator - main entry point for cache reads.

use crate::backend::{CacheBackend, Dependency};
use crate::config::RefreshAheadConfig;
use crate::error::Result;
use crate::generator::{Generator, RefreshRequest};
use crate::key::{CacheKey, KeyCodec};
use crate::lock::LockCoordinator;
use crate::mutex::{KeyedMutex, NoMutex};
use crate::observability::{NoOpMetrics, RefreshAheadMetrics};
use crate::serialization::{deserialize_from_cache, serialize_for_cache};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Serves cached values and regenerates them before they expire.
///
/// Every read first tries to `add` a guard entry whose TTL is a fraction
/// (`refresh_ahead_factor`) of the data duration. The caller that manages to
/// create it while the data is still cached triggers the generator's
/// `refresh`; everyone else just reads. On a miss the value is generated
/// synchronously, under a lock when a mutex is configured.
///
/// `D` holds the values, `G` the guard entries (the same store unless
/// [`RefreshAheadBuilder::with_guard_cache`] is used), `M` serializes
/// generation.
///
/// # Example
///
/// ```
/// use refresh_ahead_cache::backend::InMemoryBackend;
/// use refresh_ahead_cache::generator::CallableGenerator;
/// use refresh_ahead_cache::{CacheKey, RefreshAhead};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> refresh_ahead_cache::Result<()> {
/// let cache = RefreshAhead::new(InMemoryBackend::new());
/// let generator = CallableGenerator::new(|_cache: InMemoryBackend| async {
///     Ok(Some("report".to_string()))
/// });
///
/// let key = CacheKey::from("daily-report");
/// let value = cache
///     .get_refresh_or_set(&key, &generator, Some(Duration::from_secs(60)), None)
///     .await?;
/// assert_eq!(value.as_deref(), Some("report"));
/// # Ok(())
/// # }
/// ```
pub struct RefreshAhead<D, G = D, M = NoMutex> {
    data_cache: D,
    guard_cache: G,
    locks: LockCoordinator<M>,
    config: RefreshAheadConfig,
    metrics: Box<dyn RefreshAheadMetrics>,
}

impl<D: CacheBackend> RefreshAhead<D> {
    /// Orchestrator with default configuration, no mutex, and `cache`
    /// holding both values and guard entries.
    pub fn new(cache: D) -> Self {
        RefreshAhead {
            guard_cache: cache.clone(),
            data_cache: cache,
            locks: LockCoordinator::new(None, crate::config::DEFAULT_LOCK_NAME_SUFFIX),
            config: RefreshAheadConfig::default(),
            metrics: Box::new(NoOpMetrics),
        }
    }

    pub fn builder(cache: D) -> RefreshAheadBuilder<D> {
        RefreshAheadBuilder::new(cache)
    }
}

impl<D, G, M> RefreshAhead<D, G, M>
where
    D: CacheBackend,
    G: CacheBackend,
    M: KeyedMutex,
{
    /// Return the cached value for `key`, triggering a refresh when its
    /// refresh-ahead threshold has passed, or generate it on a miss.
    ///
    /// `duration` is the data lifetime: `None` uses the data cache's default,
    /// `Some(Duration::ZERO)` stores without expiry (and never refreshes
    /// ahead).
    ///
    /// A refresh that cannot be started drops the guard entry so the next
    /// reader tries again; the cached value is returned either way.
    ///
    /// # Errors
    ///
    /// Returns `Err` when:
    /// - `Error::BackendError`: the guard or data cache is unavailable
    /// - `Error::GenerationError` / `Error::ConfigError`: generation on a miss fails
    /// - `Error::SerializationError`: the guard marker cannot be encoded
    ///
    /// Corrupt cached entries are evicted and treated as misses.
    pub async fn get_refresh_or_set<Gen>(
        &self,
        key: &CacheKey,
        generator: &Gen,
        duration: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<Option<Gen::Value>>
    where
        Gen: Generator<D>,
    {
        let data_key = key.build();
        let guard_key = self.guard_key(key);
        let refresh_timeout = self.compute_refresh_timeout_duration(duration);

        // The add must come before the read: it is what limits each
        // threshold window to a single refresh trigger.
        let needs_refresh = self
            .guard_cache
            .add(
                &guard_key,
                serialize_for_cache(&true)?,
                non_zero(refresh_timeout),
                dependency,
            )
            .await?;

        let Some(value) = self.read::<Gen::Value>(&data_key).await? else {
            self.metrics.record_miss(&data_key);
            return self
                .generate_and_set(key, generator, duration, dependency)
                .await;
        };

        self.metrics.record_hit(&data_key);

        if needs_refresh {
            let request = RefreshRequest {
                key: key.clone(),
                duration,
                dependency: dependency.cloned(),
                job_ttl: non_zero(self.compute_refresh_generated_duration(duration)),
            };

            self.metrics.record_refresh_triggered(&data_key);
            if !generator.refresh(&self.data_cache, &request).await {
                self.metrics.record_refresh_failed(&data_key);
                if let Err(e) = self.guard_cache.delete(&guard_key).await {
                    warn!("⚠ Failed to drop refresh guard {}: {}", guard_key, e);
                }
            }
        }

        Ok(Some(value))
    }

    /// Generate the value for `key` and store it.
    ///
    /// Waits for the generation lock as long as the generator's
    /// `mutex_lock_timeout` allows. See
    /// [`generate_and_set_with_lock_timeout`](Self::generate_and_set_with_lock_timeout).
    pub async fn generate_and_set<Gen>(
        &self,
        key: &CacheKey,
        generator: &Gen,
        duration: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<Option<Gen::Value>>
    where
        Gen: Generator<D>,
    {
        self.generate_and_set_with_lock_timeout(key, generator, duration, dependency, None)
            .await
    }

    /// Generate the value for `key` and store it, waiting at most
    /// `lock_timeout` (or the generator's own timeout when `None`) for the
    /// generation lock.
    ///
    /// With the lock held the data cache is read again first; a value written
    /// by the previous holder is returned without generating. Without the
    /// lock generation proceeds anyway. A value that cannot be written back
    /// is logged and still returned.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the data cache cannot be read or generation fails.
    /// The lock is released in every case.
    pub async fn generate_and_set_with_lock_timeout<Gen>(
        &self,
        key: &CacheKey,
        generator: &Gen,
        duration: Option<Duration>,
        dependency: Option<&Dependency>,
        lock_timeout: Option<Duration>,
    ) -> Result<Option<Gen::Value>>
    where
        Gen: Generator<D>,
    {
        let locked = self
            .locks
            .acquire(key, generator.mutex_lock_timeout(), lock_timeout)
            .await;

        let result = self
            .generate_locked(key, generator, duration, dependency, locked)
            .await;

        if locked {
            self.locks.release(key).await;
        }
        result
    }

    async fn generate_locked<Gen>(
        &self,
        key: &CacheKey,
        generator: &Gen,
        duration: Option<Duration>,
        dependency: Option<&Dependency>,
        locked: bool,
    ) -> Result<Option<Gen::Value>>
    where
        Gen: Generator<D>,
    {
        let data_key = key.build();

        if locked {
            if let Some(value) = self.read::<Gen::Value>(&data_key).await? {
                debug!("✓ {} was generated while waiting for the lock", data_key);
                return Ok(Some(value));
            }
        }

        let Some(value) = generator.generate(&self.data_cache).await? else {
            debug!("Generator returned nothing to cache for {}", data_key);
            return Ok(None);
        };

        self.metrics.record_generated(&data_key);
        self.write(&data_key, &value, duration, dependency).await;
        Ok(Some(value))
    }

    async fn read<V: DeserializeOwned>(&self, data_key: &str) -> Result<Option<V>> {
        let Some(bytes) = self.data_cache.get(data_key).await? else {
            return Ok(None);
        };

        match deserialize_from_cache::<V>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_corrupt_entry() => {
                warn!("⚠ Evicting unreadable cache entry {}: {}", data_key, e);
                if let Err(e) = self.data_cache.delete(data_key).await {
                    warn!("⚠ Failed to evict {}: {}", data_key, e);
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn write<V: serde::Serialize>(
        &self,
        data_key: &str,
        value: &V,
        duration: Option<Duration>,
        dependency: Option<&Dependency>,
    ) {
        let ttl = self.data_ttl(duration);
        let written = match serialize_for_cache(value) {
            Ok(bytes) => self.data_cache.set(data_key, bytes, ttl, dependency).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => debug!("✓ Cached {} (TTL: {:?})", data_key, ttl),
            Err(e) => {
                warn!("⚠ Failed to set cache value for key {}: {}", data_key, e);
                self.metrics.record_write_failed(data_key, &e.to_string());
            }
        }
    }

    /// Store TTL for a data write: `duration` or the store default, with
    /// zero meaning no expiry.
    fn data_ttl(&self, duration: Option<Duration>) -> Option<Duration> {
        duration
            .or_else(|| self.data_cache.default_ttl())
            .and_then(non_zero)
    }

    /// Guard TTL for a data duration: `ceil(duration * refresh_ahead_factor)`
    /// in whole seconds, or zero when the data never expires.
    pub fn compute_refresh_timeout_duration(&self, duration: Option<Duration>) -> Duration {
        self.scaled(duration, self.config.refresh_ahead_factor)
    }

    /// How long a deferred refresh for a data duration stays worth running.
    /// Zero when the data never expires.
    pub fn compute_refresh_generated_duration(&self, duration: Option<Duration>) -> Duration {
        self.scaled(duration, self.config.effective_generated_factor())
    }

    fn scaled(&self, duration: Option<Duration>, factor: f64) -> Duration {
        match duration.or_else(|| self.data_cache.default_ttl()) {
            Some(d) if !d.is_zero() => Duration::from_secs(ceil_scaled_secs(d, factor)),
            _ => Duration::ZERO,
        }
    }

    /// Store key of the guard entry for `key`.
    pub fn guard_key(&self, key: &CacheKey) -> String {
        KeyCodec::derive(key, &self.config.guard_key_suffix).build()
    }

    /// Mutex name guarding generation of `key`.
    pub fn lock_name(&self, key: &CacheKey) -> String {
        self.locks.lock_name(key)
    }

    pub fn data_cache(&self) -> &D {
        &self.data_cache
    }

    pub fn guard_cache(&self) -> &G {
        &self.guard_cache
    }

    pub fn mutex(&self) -> Option<&M> {
        self.locks.mutex()
    }

    pub fn config(&self) -> &RefreshAheadConfig {
        &self.config
    }

    pub fn metrics(&self) -> &dyn RefreshAheadMetrics {
        self.metrics.as_ref()
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

fn ceil_scaled_secs(d: Duration, factor: f64) -> u64 {
    let scaled = (d.as_secs_f64() * factor).ceil();
    if scaled.is_finite() && scaled > 0.0 {
        scaled as u64
    } else {
        0
    }
}

/// Builder for [`RefreshAhead`].
///
/// ```
/// use refresh_ahead_cache::backend::InMemoryBackend;
/// use refresh_ahead_cache::mutex::InMemoryMutex;
/// use refresh_ahead_cache::RefreshAhead;
///
/// let cache = RefreshAhead::builder(InMemoryBackend::new())
///     .with_guard_cache(InMemoryBackend::new())
///     .with_mutex(InMemoryMutex::new())
///     .with_refresh_ahead_factor(0.75)
///     .build()
///     .unwrap();
/// assert!(cache.mutex().is_some());
/// ```
pub struct RefreshAheadBuilder<D, G = D, M = NoMutex> {
    data_cache: D,
    guard_cache: G,
    mutex: Option<M>,
    config: RefreshAheadConfig,
    metrics: Box<dyn RefreshAheadMetrics>,
}

impl<D: CacheBackend> RefreshAheadBuilder<D> {
    pub fn new(cache: D) -> Self {
        RefreshAheadBuilder {
            guard_cache: cache.clone(),
            data_cache: cache,
            mutex: None,
            config: RefreshAheadConfig::default(),
            metrics: Box::new(NoOpMetrics),
        }
    }
}

impl<D, G, M> RefreshAheadBuilder<D, G, M>
where
    D: CacheBackend,
    G: CacheBackend,
    M: KeyedMutex,
{
    /// Keep guard entries in a separate store.
    pub fn with_guard_cache<G2: CacheBackend>(self, guard_cache: G2) -> RefreshAheadBuilder<D, G2, M> {
        RefreshAheadBuilder {
            data_cache: self.data_cache,
            guard_cache,
            mutex: self.mutex,
            config: self.config,
            metrics: self.metrics,
        }
    }

    /// Serialize generation through `mutex`.
    pub fn with_mutex<M2: KeyedMutex>(self, mutex: M2) -> RefreshAheadBuilder<D, G, M2> {
        RefreshAheadBuilder {
            data_cache: self.data_cache,
            guard_cache: self.guard_cache,
            mutex: Some(mutex),
            config: self.config,
            metrics: self.metrics,
        }
    }

    pub fn with_config(mut self, config: RefreshAheadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_refresh_ahead_factor(mut self, factor: f64) -> Self {
        self.config.refresh_ahead_factor = factor;
        self
    }

    pub fn with_refresh_generated_factor(mut self, factor: f64) -> Self {
        self.config.refresh_generated_factor = Some(factor);
        self
    }

    pub fn with_guard_key_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.guard_key_suffix = suffix.into();
        self
    }

    pub fn with_lock_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.lock_name_suffix = suffix.into();
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn RefreshAheadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` if the configuration does not validate.
    pub fn build(self) -> Result<RefreshAhead<D, G, M>> {
        self.config.validate()?;

        info!(
            "✓ Refresh-ahead cache ready (factor: {}, generated factor: {}, mutex: {})",
            self.config.refresh_ahead_factor,
            self.config.effective_generated_factor(),
            self.mutex.is_some()
        );

        Ok(RefreshAhead {
            locks: LockCoordinator::new(self.mutex, self.config.lock_name_suffix.clone()),
            data_cache: self.data_cache,
            guard_cache: self.guard_cache,
            config: self.config,
            metrics: self.metrics,
        })
    }
}
