//! Integration tests for refresh-ahead-cache
//!
//! These tests drive the orchestrator end to end over the in-memory backend
//! with a paused tokio clock, so TTL windows are deterministic.

use refresh_ahead_cache::backend::{CacheBackend, InMemoryBackend};
use refresh_ahead_cache::generator::{generate_fn, CallableGenerator, GeneratorSource};
use refresh_ahead_cache::mutex::{BackendMutex, InMemoryMutex, KeyedMutex};
use refresh_ahead_cache::observability::RefreshAheadMetrics;
use refresh_ahead_cache::serialization::serialize_for_cache;
use refresh_ahead_cache::{
    ensure_generator, CacheKey, Dependency, Error, Generator, RefreshAhead, RefreshRequest, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TEN_SECONDS: Option<Duration> = Some(Duration::from_secs(10));

/// Route the crate's `log` output through the test harness.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared call counters for an instrumented generator.
#[derive(Clone, Default)]
struct Calls {
    generate: Arc<AtomicUsize>,
    refresh: Arc<AtomicUsize>,
}

impl Calls {
    fn generated(&self) -> usize {
        self.generate.load(Ordering::SeqCst)
    }

    fn refreshed(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }
}

fn instrumented(
    calls: &Calls,
    value: &'static str,
    refresh_result: bool,
) -> CallableGenerator<InMemoryBackend, String> {
    init_logging();
    let generate = calls.generate.clone();
    let refresh = calls.refresh.clone();

    CallableGenerator::new(move |_cache: InMemoryBackend| {
        generate.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Some(value.to_string())) }
    })
    .with_refresh(move |_cache, _request| {
        refresh.fetch_add(1, Ordering::SeqCst);
        async move { refresh_result }
    })
}

#[derive(Clone, Default)]
struct CountingMetrics {
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
    triggered: Arc<AtomicUsize>,
    trigger_failures: Arc<AtomicUsize>,
    write_failures: Arc<AtomicUsize>,
}

impl RefreshAheadMetrics for CountingMetrics {
    fn record_hit(&self, _key: &str) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn record_miss(&self, _key: &str) {
        self.misses.fetch_add(1, Ordering::SeqCst);
    }

    fn record_refresh_triggered(&self, _key: &str) {
        self.triggered.fetch_add(1, Ordering::SeqCst);
    }

    fn record_refresh_failed(&self, _key: &str) {
        self.trigger_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn record_write_failed(&self, _key: &str, _error: &str) {
        self.write_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend whose writes always fail. Reads and guard adds work.
#[derive(Clone, Default)]
struct ReadOnlyBackend {
    inner: InMemoryBackend,
}

impl CacheBackend for ReadOnlyBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        _value: Vec<u8>,
        _ttl: Option<Duration>,
        _dependency: Option<&Dependency>,
    ) -> Result<()> {
        Err(Error::BackendError(format!("store is read-only ({})", key)))
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&Dependency>,
    ) -> Result<bool> {
        self.inner.add(key, value, ttl, dependency).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

/// Test 1: Refresh-ahead timeline
///
/// duration = 10s, factor = 0.5, so the guard lives 5s:
/// - t=0: miss, generate, value cached for 10s, guard for 5s
/// - t=6: guard gone, data valid: refresh triggered, cached value returned
/// - t=7: guard re-armed: no refresh
#[tokio::test(start_paused = true)]
async fn test_refresh_ahead_timeline() {
    let backend = InMemoryBackend::new();
    let cache = RefreshAhead::new(backend.clone());
    let calls = Calls::default();
    let generator = instrumented(&calls, "v1", true);
    let key = CacheKey::from("report");

    let value = cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("t=0 read should succeed");
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!((calls.generated(), calls.refreshed()), (1, 0));
    assert_eq!(
        backend.ttl_of(&cache.guard_key(&key)).await,
        Some(Some(Duration::from_secs(5)))
    );

    tokio::time::advance(Duration::from_secs(6)).await;
    let value = cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("t=6 read should succeed");
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!((calls.generated(), calls.refreshed()), (1, 1));

    tokio::time::advance(Duration::from_secs(1)).await;
    let value = cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("t=7 read should succeed");
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!((calls.generated(), calls.refreshed()), (1, 1));
}

/// Test 2: Idempotent reads
///
/// Reads inside the data TTL and before the threshold touch neither
/// `generate` nor `refresh`.
#[tokio::test(start_paused = true)]
async fn test_reads_before_threshold_are_idempotent() {
    let cache = RefreshAhead::new(InMemoryBackend::new());
    let calls = Calls::default();
    let generator = instrumented(&calls, "v1", true);
    let key = CacheKey::from(vec![CacheKey::from("user"), CacheKey::from(7)]);

    cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Failed to prime cache");

    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(1)).await;
        let value = cache
            .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
            .await
            .expect("Cached read should succeed");
        assert_eq!(value.as_deref(), Some("v1"));
    }

    assert_eq!((calls.generated(), calls.refreshed()), (1, 0));
}

/// Test 3: Trigger-failure recovery
///
/// A refresh that cannot be started drops the guard, so the very next read
/// tries again.
#[tokio::test(start_paused = true)]
async fn test_failed_trigger_is_retried_by_next_reader() {
    let metrics = CountingMetrics::default();
    let cache = RefreshAhead::builder(InMemoryBackend::new())
        .with_metrics(Box::new(metrics.clone()))
        .build()
        .expect("Failed to build cache");
    let calls = Calls::default();
    let generator = instrumented(&calls, "v1", false);
    let key = CacheKey::from("report");

    cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Failed to prime cache");

    tokio::time::advance(Duration::from_secs(6)).await;
    for expected in 1..=2 {
        let value = cache
            .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
            .await
            .expect("Read should succeed despite failed trigger");
        assert_eq!(value.as_deref(), Some("v1"));
        assert_eq!(calls.refreshed(), expected);
    }

    assert_eq!(calls.generated(), 1);
    assert_eq!(metrics.trigger_failures.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.hits.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.misses.load(Ordering::SeqCst), 1);
}

/// Test 4: Expired data is regenerated on the read path
#[tokio::test(start_paused = true)]
async fn test_expired_value_is_regenerated() {
    let cache = RefreshAhead::new(InMemoryBackend::new());
    let calls = Calls::default();
    let generator = instrumented(&calls, "v1", true);
    let key = CacheKey::from("report");

    cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Failed to prime cache");

    tokio::time::advance(Duration::from_secs(11)).await;
    let value = cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Read after expiry should succeed");

    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!((calls.generated(), calls.refreshed()), (2, 0));
}

/// Test 5: Double-checked locking
///
/// While the lock is held elsewhere another writer stores the value; once
/// the lock is released `generate_and_set` returns that value without
/// generating.
#[tokio::test(start_paused = true)]
async fn test_double_checked_locking_skips_generation() {
    let backend = InMemoryBackend::new();
    let mutex = InMemoryMutex::new();
    let cache = RefreshAhead::builder(backend.clone())
        .with_mutex(mutex.clone())
        .build()
        .expect("Failed to build cache");
    let calls = Calls::default();
    let generator = instrumented(&calls, "generated", true)
        .with_mutex_lock_timeout(Duration::from_secs(5));
    let key = CacheKey::from("report");
    let lock_name = cache.lock_name(&key);

    assert!(mutex
        .acquire(&lock_name, Duration::ZERO)
        .await
        .expect("Failed to take lock"));

    let other_writer = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let bytes = serialize_for_cache(&"written-elsewhere".to_string()).expect("Failed to encode");
        backend
            .set("report", bytes, None, None)
            .await
            .expect("Failed to write");
        mutex.release(&lock_name).await.expect("Failed to release");
    };

    let (value, ()) = tokio::join!(
        cache.generate_and_set(&key, &generator, TEN_SECONDS, None),
        other_writer
    );

    assert_eq!(
        value.expect("generate_and_set should succeed").as_deref(),
        Some("written-elsewhere")
    );
    assert_eq!(calls.generated(), 0);
    assert!(!mutex.is_locked(&lock_name));
}

/// Test 6: Lock wait is bounded
///
/// When the lock never frees up, generation proceeds once the wait elapses.
#[tokio::test(start_paused = true)]
async fn test_lock_timeout_falls_back_to_generation() {
    let mutex = InMemoryMutex::new();
    let cache = RefreshAhead::builder(InMemoryBackend::new())
        .with_mutex(mutex.clone())
        .build()
        .expect("Failed to build cache");
    let calls = Calls::default();
    let generator = instrumented(&calls, "v1", true).with_mutex_lock_timeout(Duration::from_secs(1));
    let key = CacheKey::from("report");

    assert!(mutex
        .acquire(&cache.lock_name(&key), Duration::ZERO)
        .await
        .unwrap());

    let started = tokio::time::Instant::now();
    let value = cache
        .generate_and_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Generation should proceed without the lock");
    assert_eq!(value.as_deref(), Some("v1"));
    assert!(started.elapsed() >= Duration::from_secs(1));

    // an explicit override skips the wait entirely
    let started = tokio::time::Instant::now();
    cache
        .generate_and_set_with_lock_timeout(&key, &generator, TEN_SECONDS, None, Some(Duration::ZERO))
        .await
        .expect("Generation should proceed without the lock");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.generated(), 2);

    // the lock we never held stays with its owner
    assert!(mutex.is_locked(&cache.lock_name(&key)));
}

/// Test 7: Concurrent misses with a mutex generate once
#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_generate_once() {
    let backend = InMemoryBackend::new();
    let cache = RefreshAhead::builder(backend.clone())
        .with_mutex(BackendMutex::new(backend.clone()))
        .build()
        .expect("Failed to build cache");

    let generated = Arc::new(AtomicUsize::new(0));
    let counter = generated.clone();
    let generator = CallableGenerator::new(move |_cache: InMemoryBackend| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Some(42u64))
        }
    })
    .with_mutex_lock_timeout(Duration::from_secs(5));
    let key = CacheKey::from("slow");

    let readers = (0..8).map(|_| cache.get_refresh_or_set(&key, &generator, TEN_SECONDS, None));
    let results = futures::future::join_all(readers).await;

    for result in results {
        assert_eq!(result.expect("Concurrent read should succeed"), Some(42));
    }
    assert_eq!(generated.load(Ordering::SeqCst), 1);
}

/// Test 8: A failed write is not fatal
#[tokio::test]
async fn test_write_failure_still_returns_value() {
    let metrics = CountingMetrics::default();
    let cache = RefreshAhead::builder(ReadOnlyBackend::default())
        .with_metrics(Box::new(metrics.clone()))
        .build()
        .expect("Failed to build cache");
    let generator = CallableGenerator::new(|_cache: ReadOnlyBackend| async { Ok(Some(7u32)) });

    let value = cache
        .get_refresh_or_set(&CacheKey::from("k"), &generator, TEN_SECONDS, None)
        .await
        .expect("Write failure must not surface");

    assert_eq!(value, Some(7));
    assert_eq!(metrics.write_failures.load(Ordering::SeqCst), 1);
}

/// Test 9: Bare function generator
///
/// `refresh` is always `false` and never calls anything; once the threshold
/// passes every reader retries the trigger and still gets the cached value.
#[tokio::test(start_paused = true)]
async fn test_bare_function_generator() {
    let generated = Arc::new(AtomicUsize::new(0));
    let counter = generated.clone();
    let source: GeneratorSource<InMemoryBackend, String> =
        GeneratorSource::Function(generate_fn(move |_cache: InMemoryBackend| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Some("v1".to_string())) }
        }));
    let generator = ensure_generator(source).expect("Failed to resolve generator");

    let request = RefreshRequest {
        key: CacheKey::from("k"),
        duration: TEN_SECONDS,
        dependency: None,
        job_ttl: None,
    };
    assert!(!generator.refresh(&InMemoryBackend::new(), &request).await);
    assert_eq!(generated.load(Ordering::SeqCst), 0);

    let cache = RefreshAhead::new(InMemoryBackend::new());
    let key = CacheKey::from("k");
    cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Failed to prime cache");

    tokio::time::advance(Duration::from_secs(6)).await;
    let value = cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, None)
        .await
        .expect("Cached read should succeed");
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!(generated.load(Ordering::SeqCst), 1);
}

/// Test 10: Dependencies travel with data and guard entries
#[tokio::test]
async fn test_dependency_is_stored_with_entries() {
    let backend = InMemoryBackend::new();
    let cache = RefreshAhead::new(backend.clone());
    let generator = instrumented(&Calls::default(), "v1", true);
    let key = CacheKey::from("tagged");
    let dependency = Dependency::new(serde_json::json!({"tags": ["reports"]}));

    cache
        .get_refresh_or_set(&key, &generator, TEN_SECONDS, Some(&dependency))
        .await
        .expect("Failed to read through");

    assert_eq!(backend.dependency_of("tagged").await, Some(dependency.clone()));
    assert_eq!(
        backend.dependency_of(&cache.guard_key(&key)).await,
        Some(dependency)
    );
}

/// Test 11: Data without expiry never refreshes ahead
#[tokio::test(start_paused = true)]
async fn test_no_expiry_never_triggers_refresh() {
    let backend = InMemoryBackend::new();
    let cache = RefreshAhead::new(backend.clone());
    let calls = Calls::default();
    let generator = instrumented(&calls, "v1", true);
    let key = CacheKey::from("forever");

    for _ in 0..3 {
        cache
            .get_refresh_or_set(&key, &generator, Some(Duration::ZERO), None)
            .await
            .expect("Read should succeed");
        tokio::time::advance(Duration::from_secs(3600)).await;
    }

    assert_eq!((calls.generated(), calls.refreshed()), (1, 0));
    assert_eq!(backend.ttl_of("forever").await, Some(None));
    // the guard written by the first read never expires either
    assert_eq!(backend.ttl_of(&cache.guard_key(&key)).await, Some(None));
}
