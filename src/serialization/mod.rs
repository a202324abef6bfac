//! Versioned binary envelope for values written by the orchestrator.
//!
//! Cached values and guard markers are encoded with Postcard inside a small
//! envelope:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (varint)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "RFSH"                u32              postcard::to_allocvec(T)
//! ```
//!
//! A read that fails the magic or version check is reported as a corrupt
//! entry (see [`Error::is_corrupt_entry`]), which the orchestrator treats as a
//! miss: the entry is evicted and regenerated rather than surfaced to callers.
//!
//! ```rust
//! use refresh_ahead_cache::serialization::{serialize_for_cache, deserialize_from_cache};
//!
//! # fn main() -> refresh_ahead_cache::Result<()> {
//! let bytes = serialize_for_cache(&vec![1u32, 2, 3])?;
//! let value: Vec<u32> = deserialize_from_cache(&bytes)?;
//! assert_eq!(value, vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header identifying entries written by this crate.
pub const CACHE_MAGIC: [u8; 4] = *b"RFSH";

/// Envelope schema version.
///
/// Bump when the layout of cached types changes incompatibly; old entries
/// then fail validation and get regenerated.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Envelope wrapped around every stored value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub magic: [u8; 4],
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Encode `value` into enveloped Postcard bytes.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard cannot encode the value.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode enveloped bytes, validating magic and version.
///
/// # Errors
///
/// - `Error::DeserializationError`: truncated or malformed payload
/// - `Error::InvalidCacheEntry`: foreign magic header
/// - `Error::VersionMismatch`: entry written by an incompatible version
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        debug!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
