use async_trait::async_trait;

use crate::model::Order;

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;

// ============================================================================
// Cache Contract
// ============================================================================
//
// A cache entry is always a complete aggregate snapshot keyed by order uid.
// A miss is control flow, not an error: callers branch on `CacheLookup`
// rather than inspecting an error value. `CacheError` is reserved for
// genuine backend failures.
//
// ============================================================================

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Order),
    Miss,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cache backend failure: {0}")]
    Backend(#[from] ::redis::RedisError),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderCache: Send + Sync {
    /// Look up a cached order, promoting it to most-recently-used on a hit.
    async fn get(&self, uid: &str) -> Result<CacheLookup, CacheError>;

    /// Store a complete aggregate snapshot, replacing any previous entry.
    async fn put(&self, uid: &str, order: &Order) -> Result<(), CacheError>;

    /// Side-effect-free liveness probe.
    async fn health_check(&self) -> Result<(), CacheError>;
}
