//! In-process generator built from closures.

use super::{Generator, RefreshRequest};
use crate::backend::CacheBackend;
use crate::error::Result;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Shared synchronous-generation function. Receives a handle to the data cache.
pub type GenerateFn<B, V> = Arc<dyn Fn(B) -> BoxFuture<'static, Result<Option<V>>> + Send + Sync>;

/// Shared refresh-trigger function. Returns whether the refresh was started.
pub type RefreshFn<B> = Arc<dyn Fn(B, RefreshRequest) -> BoxFuture<'static, bool> + Send + Sync>;

/// Wrap an async closure as a [`GenerateFn`].
pub fn generate_fn<B, V, F, Fut>(f: F) -> GenerateFn<B, V>
where
    F: Fn(B) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<V>>> + Send + 'static,
{
    Arc::new(move |cache| f(cache).boxed())
}

/// Wrap an async closure as a [`RefreshFn`].
pub fn refresh_fn<B, F, Fut>(f: F) -> RefreshFn<B>
where
    F: Fn(B, RefreshRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |cache, request| f(cache, request).boxed())
}

/// Generator whose operations run user closures on the calling task.
///
/// `refresh` reports `false` when no refresh closure was supplied, which makes
/// the orchestrator drop the guard so the next reader tries again.
///
/// ```
/// use refresh_ahead_cache::backend::InMemoryBackend;
/// use refresh_ahead_cache::generator::CallableGenerator;
/// use std::time::Duration;
///
/// let generator = CallableGenerator::new(|_cache: InMemoryBackend| async {
///     Ok(Some("fresh".to_string()))
/// })
/// .with_mutex_lock_timeout(Duration::from_secs(3));
/// ```
pub struct CallableGenerator<B, V> {
    generate: GenerateFn<B, V>,
    refresh: Option<RefreshFn<B>>,
    mutex_lock_timeout: Duration,
}

impl<B, V> Clone for CallableGenerator<B, V> {
    fn clone(&self) -> Self {
        CallableGenerator {
            generate: Arc::clone(&self.generate),
            refresh: self.refresh.clone(),
            mutex_lock_timeout: self.mutex_lock_timeout,
        }
    }
}

impl<B: CacheBackend + 'static, V: Send + 'static> CallableGenerator<B, V> {
    /// Generator with only a generate function and no lock wait.
    pub fn new<F, Fut>(generate: F) -> Self
    where
        F: Fn(B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        Self::from_fn(generate_fn(generate))
    }

    pub fn from_fn(generate: GenerateFn<B, V>) -> Self {
        CallableGenerator {
            generate,
            refresh: None,
            mutex_lock_timeout: Duration::ZERO,
        }
    }

    pub fn with_refresh<F, Fut>(self, refresh: F) -> Self
    where
        F: Fn(B, RefreshRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.with_refresh_fn(refresh_fn(refresh))
    }

    pub fn with_refresh_fn(mut self, refresh: RefreshFn<B>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn with_mutex_lock_timeout(mut self, timeout: Duration) -> Self {
        self.mutex_lock_timeout = timeout;
        self
    }

    pub fn has_refresh(&self) -> bool {
        self.refresh.is_some()
    }
}

impl<B, V> Generator<B> for CallableGenerator<B, V>
where
    B: CacheBackend + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Value = V;

    fn mutex_lock_timeout(&self) -> Duration {
        self.mutex_lock_timeout
    }

    async fn generate(&self, cache: &B) -> Result<Option<V>> {
        (self.generate)(cache.clone()).await
    }

    async fn refresh(&self, cache: &B, request: &RefreshRequest) -> bool {
        match &self.refresh {
            Some(refresh) => refresh(cache.clone(), request.clone()).await,
            None => false,
        }
    }
}

/// Configuration record for an in-process generator.
///
/// Unlike [`CallableGenerator`] every field is optional so a record can be
/// assembled piecemeal; [`ensure_generator`](super::ensure_generator) rejects
/// it when `generate` is missing.
pub struct InProcessConfig<B, V> {
    pub generate: Option<GenerateFn<B, V>>,
    pub refresh: Option<RefreshFn<B>>,
    /// Seconds to wait for the generation lock.
    pub mutex_lock_timeout: u64,
}

impl<B, V> Default for InProcessConfig<B, V> {
    fn default() -> Self {
        InProcessConfig {
            generate: None,
            refresh: None,
            mutex_lock_timeout: 0,
        }
    }
}
