//! Shared key-value cache used for read-through projections, admission
//! counters and idempotency records.
//!
//! Only single-key atomic operations are exposed. Multi-key invariants built
//! on top of this (quota ledger) are approximate under concurrency.

mod memory;
mod redis_cache;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("value at '{0}' is not an integer")]
    NotAnInteger(String),
}

/// Key-value store with per-key expiry and atomic increment.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically add `delta` to the integer at `key` (missing = 0) and
    /// return the new value. An existing expiry is preserved.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Set an expiry on an existing key. Missing keys are left alone.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Read an integer counter, treating a missing key as zero.
pub async fn get_counter(cache: &dyn Cache, key: &str) -> Result<i64, CacheError> {
    match cache.get(key).await? {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CacheError::NotAnInteger(key.to_string())),
        None => Ok(0),
    }
}
