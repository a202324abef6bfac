//! Memcached Backend Integration Tests
//!
//! These tests require a running Memcached instance and skip themselves when
//! none is reachable.
//!
//! ```bash
//! cargo test --features memcached --test memcached_integration_test
//! ```
//!
//! **Note:** Tests use unique key prefixes per test to avoid conflicts when run in parallel.
//!
//! ## Environment Variables
//!
//! - `TEST_MEMCACHED_URL`: Memcached server address (default: "localhost:11211")

#![cfg(feature = "memcached")]

use refresh_ahead_cache::backend::{CacheBackend, MemcachedBackend};
use refresh_ahead_cache::generator::CallableGenerator;
use refresh_ahead_cache::{CacheKey, RefreshAhead};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Helper: Get Memcached server address from environment or use default
fn get_memcached_url() -> String {
    env::var("TEST_MEMCACHED_URL").unwrap_or_else(|_| "localhost:11211".to_string())
}

/// Helper: Connect, or `None` when Memcached is not reachable
async fn connect() -> Option<MemcachedBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = MemcachedBackend::from_server(get_memcached_url()).await.ok()?;
    match backend.health_check().await {
        Ok(true) => Some(backend),
        _ => {
            println!("⚠️  Memcached not available, skipping test");
            None
        }
    }
}

/// Helper: Unique key using only characters memcached accepts
fn unique_key(base: &str) -> String {
    format!("test_{}_{}", Uuid::now_v7().simple(), base)
}

#[tokio::test]
async fn test_memcached_add_is_create_if_absent() {
    let Some(backend) = connect().await else {
        return;
    };
    let key = unique_key("guard");

    assert!(backend
        .add(&key, b"1".to_vec(), Some(Duration::from_secs(5)), None)
        .await
        .expect("ADD should succeed"));
    assert!(!backend
        .add(&key, b"2".to_vec(), Some(Duration::from_secs(5)), None)
        .await
        .expect("ADD should not error when the key exists"));
    assert_eq!(
        backend.get(&key).await.expect("GET should succeed"),
        Some(b"1".to_vec())
    );

    backend.delete(&key).await.expect("DELETE should succeed");
    backend.delete(&key).await.expect("Deleting a missing key is not an error");
}

#[tokio::test]
async fn test_memcached_read_through() {
    let Some(backend) = connect().await else {
        return;
    };
    let cache = RefreshAhead::new(backend.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let generator = CallableGenerator::new(move |_cache: MemcachedBackend| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Some(vec![1u8, 2, 3])) }
    });
    let key = CacheKey::from(unique_key("blob"));

    for _ in 0..3 {
        let value = cache
            .get_refresh_or_set(&key, &generator, Some(Duration::from_secs(30)), None)
            .await
            .expect("Read-through should succeed");
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    backend.delete(&key.build()).await.expect("Cleanup failed");
    backend.delete(&cache.guard_key(&key)).await.expect("Cleanup failed");
}
