//! Cache key shapes and derived-key construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A user-supplied cache key.
///
/// Keys come in three shapes: a scalar ([`CacheKey::Str`], [`CacheKey::Int`]),
/// an ordered sequence of keys, or an opaque structured object. The shape
/// matters for [`KeyCodec::derive`], which builds guard keys and lock names.
///
/// Keys serialize untagged, so `"user"`, `42`, `["user", 42]` and
/// `{"user": 42}` are all valid JSON keys in a deferred job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheKey {
    Str(String),
    Int(i64),
    Seq(Vec<CacheKey>),
    Object(BTreeMap<String, CacheKey>),
}

impl CacheKey {
    /// Whether this key is a primitive scalar.
    pub fn is_scalar(&self) -> bool {
        matches!(self, CacheKey::Str(_) | CacheKey::Int(_))
    }

    /// Build the string the backing store is addressed with.
    ///
    /// Shorthand for [`KeyCodec::build`].
    pub fn build(&self) -> String {
        KeyCodec::build(self)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&KeyCodec::build(self))
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey::Str(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey::Str(value)
    }
}

impl From<i64> for CacheKey {
    fn from(value: i64) -> Self {
        CacheKey::Int(value)
    }
}

impl From<Vec<CacheKey>> for CacheKey {
    fn from(value: Vec<CacheKey>) -> Self {
        CacheKey::Seq(value)
    }
}

impl From<BTreeMap<String, CacheKey>> for CacheKey {
    fn from(value: BTreeMap<String, CacheKey>) -> Self {
        CacheKey::Object(value)
    }
}

/// Derives guard keys and lock names from a user key.
pub struct KeyCodec;

impl KeyCodec {
    /// Derive an auxiliary key from `key` and `suffix`.
    ///
    /// - sequence: `suffix` is appended as the last element
    /// - scalar: `"{scalar}/{suffix}"`
    /// - object: `[suffix, key]`
    ///
    /// The result never equals `key`, so guard entries can share a store with
    /// the data they guard.
    pub fn derive(key: &CacheKey, suffix: &str) -> CacheKey {
        match key {
            CacheKey::Seq(parts) => {
                let mut parts = parts.clone();
                parts.push(CacheKey::Str(suffix.to_string()));
                CacheKey::Seq(parts)
            }
            CacheKey::Str(s) => CacheKey::Str(format!("{}/{}", s, suffix)),
            CacheKey::Int(i) => CacheKey::Str(format!("{}/{}", i, suffix)),
            CacheKey::Object(_) => CacheKey::Seq(vec![CacheKey::Str(suffix.to_string()), key.clone()]),
        }
    }

    /// Build the store representation of a key.
    ///
    /// Scalars render as their plain text; composite keys render as compact
    /// JSON, which keeps `["a", "b"]` distinct from `"a/b"`.
    pub fn build(key: &CacheKey) -> String {
        match key {
            CacheKey::Str(s) => s.clone(),
            CacheKey::Int(i) => i.to_string(),
            composite => match serde_json::to_string(composite) {
                Ok(json) => json,
                // string-keyed maps of strings and integers always serialize
                Err(e) => {
                    warn!("Failed to encode composite cache key {:?}: {}", composite, e);
                    format!("{:?}", composite)
                }
            },
        }
    }
}
