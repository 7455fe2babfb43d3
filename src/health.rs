use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::broker::Broker;
use crate::cache::OrderCache;
use crate::store::OrderStore;

// ============================================================================
// Liveness Probes
// ============================================================================
//
// Each collaborator exposes a no-argument, side-effect-free probe; the
// registry fans out to all three and reports per-component health for the
// readiness layer. The durable store is load-bearing for both paths, so a
// store failure makes the whole service unhealthy while a cache or broker
// failure only degrades it.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(name: &'static str, result: Result<(), String>) -> Self {
        let status = match result {
            Ok(()) => HealthStatus::Healthy,
            Err(reason) => HealthStatus::Unhealthy(reason),
        };
        Self {
            name,
            status,
            last_check: Utc::now(),
        }
    }
}

pub struct HealthRegistry {
    database: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    broker: Arc<dyn Broker>,
}

impl HealthRegistry {
    pub fn new(
        database: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            database,
            cache,
            broker,
        }
    }

    pub async fn check_database(&self) -> ComponentHealth {
        let result = self.database.health_check().await;
        ComponentHealth::new("database", result.map_err(|e| e.to_string()))
    }

    pub async fn check_cache(&self) -> ComponentHealth {
        let result = self.cache.health_check().await;
        ComponentHealth::new("cache", result.map_err(|e| e.to_string()))
    }

    pub async fn check_broker(&self) -> ComponentHealth {
        let result = self.broker.health_check().await;
        ComponentHealth::new("broker", result.map_err(|e| e.to_string()))
    }

    pub async fn check_all(&self) -> Vec<ComponentHealth> {
        vec![
            self.check_database().await,
            self.check_cache().await,
            self.check_broker().await,
        ]
    }

    /// Collapse component health into one service-level status.
    pub fn overall(components: &[ComponentHealth]) -> HealthStatus {
        for component in components {
            if component.name == "database" && !component.status.is_healthy() {
                return HealthStatus::Unhealthy(format!("{} unavailable", component.name));
            }
        }
        for component in components {
            if !component.status.is_healthy() {
                return HealthStatus::Degraded(format!("{} unavailable", component.name));
            }
        }
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, MockBroker};
    use crate::cache::MockOrderCache;
    use crate::store::{MockOrderStore, StoreError};

    fn registry(
        database_ok: bool,
        cache_ok: bool,
        broker_ok: bool,
    ) -> HealthRegistry {
        let mut database = MockOrderStore::new();
        database.expect_health_check().returning(move || {
            if database_ok {
                Ok(())
            } else {
                Err(StoreError::Database(sqlx::Error::PoolTimedOut))
            }
        });

        let mut cache = MockOrderCache::new();
        cache.expect_health_check().returning(move || {
            if cache_ok {
                Ok(())
            } else {
                Err(crate::cache::CacheError::Backend(redis::RedisError::from(
                    (redis::ErrorKind::IoError, "connection refused"),
                )))
            }
        });

        let mut broker = MockBroker::new();
        broker.expect_health_check().returning(move || {
            if broker_ok {
                Ok(())
            } else {
                Err(BrokerError::Probe("metadata fetch failed".into()))
            }
        });

        HealthRegistry::new(Arc::new(database), Arc::new(cache), Arc::new(broker))
    }

    #[tokio::test]
    async fn all_probes_healthy_reports_healthy() {
        let components = registry(true, true, true).check_all().await;
        assert!(components.iter().all(|c| c.status.is_healthy()));
        assert_eq!(HealthRegistry::overall(&components), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn cache_outage_only_degrades_the_service() {
        let components = registry(true, false, true).check_all().await;
        assert!(matches!(
            HealthRegistry::overall(&components),
            HealthStatus::Degraded(_)
        ));
    }

    #[tokio::test]
    async fn database_outage_makes_the_service_unhealthy() {
        let components = registry(false, true, true).check_all().await;
        assert!(matches!(
            HealthRegistry::overall(&components),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[tokio::test]
    async fn probe_failures_carry_the_component_name() {
        let components = registry(true, true, false).check_all().await;
        let broker = components.iter().find(|c| c.name == "broker").unwrap();
        assert!(matches!(broker.status, HealthStatus::Unhealthy(_)));
    }
}
