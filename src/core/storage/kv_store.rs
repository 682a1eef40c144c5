// Persistence port for the moderation core.
//
// One uniform key/value contract serves the policy store, the exemption
// registry, the escalation engine, and the bot meta flags. There is exactly
// one production implementation (SQLite) and one in-memory implementation
// used by tests; the services cannot tell them apart.
//
// Keys are flat strings with a `prefix:` convention, e.g. `policy:{chat_id}`
// or `warnings:{chat_id}:{user_id}`. `scan` and `count` operate on those
// prefixes.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("invalid stored value at {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Uniform key/value persistence contract.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Idempotent upsert.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Atomically add 1 to the integer at `key` (treating absence as 0) and
    /// return the new value. Concurrent callers never observe the same result.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Number of keys starting with `prefix`.
    async fn count(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Up to `limit` entries whose keys start with `prefix`, in key order.
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<(String, Value)>, StoreError>;
}
