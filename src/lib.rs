//! # refresh-ahead-cache
//!
//! A refresh-ahead caching layer over any key/value store.
//!
//! Values are served from the data cache while fresh. Once a configurable
//! fraction of their lifetime has passed, the first reader triggers a
//! regeneration in the background and keeps getting the cached value; readers
//! only wait for generation on a real miss, and then at most one of them
//! generates when a mutex is configured.
//!
//! ## Features
//!
//! - **Store Agnostic:** In-memory, Redis (`redis` feature) and Memcached
//!   (`memcached` feature) backends, or any [`CacheBackend`]
//! - **One Trigger Per Window:** An atomic guard entry limits refresh triggers
//!   to one per threshold window, across processes for shared stores
//! - **Duplicate-Work Suppression:** Double-checked locking around generation
//! - **Deferred Refresh:** Refreshes can be queued as serializable jobs and run
//!   by a [`RefreshWorker`](queue::RefreshWorker) in another process; stale
//!   jobs are dropped
//!
//! ## Quick Start
//!
//! ```
//! use refresh_ahead_cache::{
//!     backend::InMemoryBackend, generator::CallableGenerator, mutex::InMemoryMutex,
//!     CacheKey, RefreshAhead,
//! };
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> refresh_ahead_cache::Result<()> {
//! let cache = RefreshAhead::builder(InMemoryBackend::new())
//!     .with_mutex(InMemoryMutex::new())
//!     .with_refresh_ahead_factor(0.5)
//!     .build()?;
//!
//! let generator = CallableGenerator::new(|_cache: InMemoryBackend| async {
//!     Ok(Some(vec![1u32, 2, 3]))
//! })
//! .with_refresh(|_cache, request| async move {
//!     // hand `request` to a background task here
//!     let _ = request;
//!     true
//! })
//! .with_mutex_lock_timeout(Duration::from_secs(5));
//!
//! let key = CacheKey::from(vec![CacheKey::from("top-products"), CacheKey::from(10)]);
//! let products = cache
//!     .get_refresh_or_set(&key, &generator, Some(Duration::from_secs(300)), None)
//!     .await?;
//! assert_eq!(products, Some(vec![1, 2, 3]));
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod error;
pub mod generator;
pub mod key;
pub mod lock;
pub mod mutex;
pub mod observability;
pub mod queue;
pub mod refresh_ahead;
pub mod serialization;

// Re-exports for convenience
pub use backend::{CacheBackend, Dependency};
pub use config::RefreshAheadConfig;
pub use error::{Error, Result};
pub use generator::{ensure_generator, AnyGenerator, Generator, GeneratorSource, RefreshRequest};
pub use key::{CacheKey, KeyCodec};
pub use mutex::KeyedMutex;
pub use refresh_ahead::{RefreshAhead, RefreshAheadBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
