use std::sync::Arc;

use crate::cache::{CacheError, CacheLookup, OrderCache};
use crate::model::Order;
use crate::store::{OrderStore, StoreError};

// ============================================================================
// Retrieval Composer (cache-aside)
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RetrievalError {
    /// For the HTTP layer's status-code mapping.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetrievalError::Store(StoreError::NotFound(_)))
    }
}

/// Read path over the cache and the durable store. Collaborators are injected
/// at construction so either can be substituted.
pub struct OrderReader {
    cache: Arc<dyn OrderCache>,
    store: Arc<dyn OrderStore>,
}

impl OrderReader {
    pub fn new(cache: Arc<dyn OrderCache>, store: Arc<dyn OrderStore>) -> Self {
        Self { cache, store }
    }

    /// Cache first; on a miss fall back to the store and repopulate the
    /// cache. A genuine cache failure is surfaced without consulting the
    /// store; a repopulate failure is logged and swallowed.
    pub async fn get_order_by_uid(&self, uid: &str) -> Result<Order, RetrievalError> {
        match self.cache.get(uid).await? {
            CacheLookup::Hit(order) => {
                tracing::debug!(order_uid = %uid, "cache hit");
                return Ok(order);
            }
            CacheLookup::Miss => {
                tracing::debug!(order_uid = %uid, "cache miss, falling back to store");
            }
        }

        let order = self.store.get_order_by_uid(uid).await?;

        if let Err(err) = self.cache.put(uid, &order).await {
            tracing::warn!(order_uid = %uid, error = %err, "failed to repopulate cache");
        } else {
            tracing::debug!(order_uid = %uid, "cache repopulated");
        }

        Ok(order)
    }
}
