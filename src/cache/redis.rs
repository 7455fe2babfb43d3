use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CacheError, CacheLookup, OrderCache};
use crate::model::Order;

/// Entries expire on their own; the ingestion path never updates an order.
const ORDER_TTL_SECS: u64 = 24 * 60 * 60;

/// Redis-backed order cache. Values are full JSON aggregate snapshots; a nil
/// reply maps to `CacheLookup::Miss` so callers never see a miss as an error.
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl OrderCache for RedisCache {
    async fn get(&self, uid: &str) -> Result<CacheLookup, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(uid).await?;
        match raw {
            Some(bytes) => Ok(CacheLookup::Hit(serde_json::from_slice(&bytes)?)),
            None => Ok(CacheLookup::Miss),
        }
    }

    async fn put(&self, uid: &str, order: &Order) -> Result<(), CacheError> {
        let payload = serde_json::to_vec(order)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(uid, payload, ORDER_TTL_SECS).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
