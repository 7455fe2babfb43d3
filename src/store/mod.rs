use async_trait::async_trait;

use crate::model::Order;

pub mod postgres;

pub use postgres::PostgresStore;

// ============================================================================
// Durable Store Contract
// ============================================================================
//
// Classification happens here, at the boundary that can tell the causes
// apart: a duplicate uid or malformed timestamp is permanent and must never
// be retried; a missing order is not-found, not a failure; a half-loadable
// aggregate is an internal inconsistency that will not self-heal. Everything
// else is a generic database failure whose transience is the caller's call.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Permanent: retrying the same payload can never succeed.
    #[error("invalid order data: {0}")]
    InvalidData(String),

    #[error("order {0} not found")]
    NotFound(String),

    /// Header exists but the related records could not be loaded.
    #[error("order {uid} could not be fully loaded: {reason}")]
    Internal { uid: String, reason: String },

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// True when redelivering the message cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::InvalidData(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist the whole aggregate atomically; a duplicate uid reports
    /// `InvalidData`.
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Fetch the attribute-complete aggregate by its uid.
    async fn get_order_by_uid(&self, uid: &str) -> Result<Order, StoreError>;

    /// Side-effect-free liveness probe.
    async fn health_check(&self) -> Result<(), StoreError>;
}
