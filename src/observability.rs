//! Hooks for observing refresh-ahead decisions.
//!
//! Implement [`RefreshAheadMetrics`] to feed counters into a monitoring
//! system:
//!
//! ```ignore
//! use refresh_ahead_cache::observability::RefreshAheadMetrics;
//!
//! struct PrometheusMetrics;
//!
//! impl RefreshAheadMetrics for PrometheusMetrics {
//!     fn record_refresh_triggered(&self, key: &str) {
//!         // counter!("refresh_ahead_triggered").inc();
//!     }
//! }
//!
//! // let cache = RefreshAhead::builder(backend)
//! //     .with_metrics(Box::new(PrometheusMetrics))
//! //     .build()?;
//! ```
//!
//! Methods that are not overridden log through the `log` crate. The default
//! sink, [`NoOpMetrics`], discards everything.

/// Lifecycle events emitted by [`RefreshAhead`](crate::RefreshAhead) and
/// [`RefreshWorker`](crate::queue::RefreshWorker). `key` is the built store key.
pub trait RefreshAheadMetrics: Send + Sync {
    /// A value was served from the data cache.
    fn record_hit(&self, key: &str) {
        debug!("Refresh-ahead HIT: {}", key);
    }

    /// The data cache had no usable value.
    fn record_miss(&self, key: &str) {
        debug!("Refresh-ahead MISS: {}", key);
    }

    /// The guard window elapsed and a refresh was handed to the generator.
    fn record_refresh_triggered(&self, key: &str) {
        debug!("Refresh-ahead TRIGGERED: {}", key);
    }

    /// The generator could not trigger a refresh; the guard was dropped.
    fn record_refresh_failed(&self, key: &str) {
        warn!("Refresh-ahead trigger failed for {}", key);
    }

    /// A value was generated synchronously.
    fn record_generated(&self, key: &str) {
        debug!("Refresh-ahead GENERATED: {}", key);
    }

    /// A generated value could not be written back.
    fn record_write_failed(&self, key: &str, error: &str) {
        warn!("Refresh-ahead write failed for {}: {}", key, error);
    }

    /// A deferred refresh job arrived after its expiry and was dropped.
    fn record_stale_job(&self, key: &str) {
        debug!("Refresh-ahead STALE JOB skipped: {}", key);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl RefreshAheadMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str) {}
    fn record_miss(&self, _key: &str) {}
    fn record_refresh_triggered(&self, _key: &str) {}
    fn record_refresh_failed(&self, _key: &str) {}
    fn record_generated(&self, _key: &str) {}
    fn record_write_failed(&self, _key: &str, _error: &str) {}
    fn record_stale_job(&self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingMetrics {
        triggered: AtomicUsize,
    }

    impl RefreshAheadMetrics for CountingMetrics {
        fn record_refresh_triggered(&self, _key: &str) {
            self.triggered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let metrics = CountingMetrics::default();
        metrics.record_hit("k");
        metrics.record_refresh_triggered("k");
        metrics.record_refresh_triggered("k");
        assert_eq!(metrics.triggered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_noop_metrics_is_object_safe() {
        let metrics: Box<dyn RefreshAheadMetrics> = Box::new(NoOpMetrics);
        metrics.record_write_failed("k", "store down");
        metrics.record_stale_job("k");
    }
}
