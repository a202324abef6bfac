//! Error types for the refresh-ahead cache.

use std::fmt;

/// Result type for refresh-ahead operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the refresh-ahead cache.
///
/// Only configuration problems and hard store/generator failures surface as
/// errors. A failed cache write after generation, a refresh that could not be
/// queued and a stale deferred job are all handled internally and never show
/// up here.
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a value to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to a value.
    ///
    /// **Recovery:** the orchestrator evicts the entry and regenerates it.
    DeserializationError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Backend storage error (Redis, Memcached, mutex store, etc).
    ///
    /// Common causes:
    /// - Redis/Memcached connection lost
    /// - Network timeout
    /// - Backend protocol error
    BackendError(String),

    /// A generator failed to produce a value.
    ///
    /// Raised by user-supplied generate functions or by a referenced method
    /// invoked through a [`ReferenceDescriptor`](crate::queue::ReferenceDescriptor).
    GenerationError(String),

    /// A deferred refresh job could not be pushed to or read from a queue.
    QueueError(String),

    /// Operation exceeded configured timeout threshold.
    Timeout(String),

    /// Invalid configuration.
    ///
    /// Raised eagerly while building the orchestrator or resolving a
    /// generator. Common causes:
    /// - `refresh_ahead_factor` negative or not finite
    /// - `refresh_generated_factor` outside `[0, 1 - refresh_ahead_factor)`
    /// - Empty guard key suffix
    /// - Missing `generate` capability or negative lock timeout
    /// - Reference names that the registry cannot resolve
    ///
    /// **Recovery:** Fix configuration and restart.
    ConfigError(String),

    /// Feature not implemented or not enabled.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::GenerationError(msg) => write!(f, "Generation error: {}", msg),
            Error::QueueError(msg) => write!(f, "Queue error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether this error means the stored bytes are unusable and the entry
    /// should be evicted and regenerated.
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(
            self,
            Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
        )
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConfigError("refresh_ahead_factor must be >= 0".to_string());
        assert_eq!(
            err.to_string(),
            "Config error: refresh_ahead_factor must be >= 0"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_corrupt_entry_classification() {
        assert!(Error::InvalidCacheEntry("magic".into()).is_corrupt_entry());
        assert!(Error::VersionMismatch {
            expected: 1,
            found: 2
        }
        .is_corrupt_entry());
        assert!(!Error::BackendError("down".into()).is_corrupt_entry());
    }

    #[test]
    fn test_json_syntax_error_maps_to_deserialization() {
        let err: Error = serde_json::from_str::<u32>("{not json")
            .expect_err("invalid json")
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
