use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_ingest::broker::{Broker, KafkaBroker};
use order_ingest::cache::{MemoryCache, OrderCache, RedisCache};
use order_ingest::config::{CacheType, Config};
use order_ingest::health::HealthRegistry;
use order_ingest::ingest::IngestWorker;
use order_ingest::store::{OrderStore, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging with environment-based filtering; override with
    // RUST_LOG, e.g. RUST_LOG=debug.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_ingest=debug")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    tracing::info!("connecting to postgres");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("running migrations")?;

    let store: Arc<dyn OrderStore> = Arc::new(PostgresStore::new(pool));

    let cache: Arc<dyn OrderCache> = match config.cache_type {
        CacheType::Memory => {
            tracing::info!(capacity = config.cache_capacity, "using in-memory cache");
            Arc::new(MemoryCache::new(config.cache_capacity))
        }
        CacheType::Redis => {
            tracing::info!(url = %config.redis_url, "connecting to redis");
            Arc::new(
                RedisCache::connect(&config.redis_url)
                    .await
                    .context("connecting to redis")?,
            )
        }
    };

    let broker = Arc::new(
        KafkaBroker::new(
            &config.kafka_url,
            &config.kafka_consumer_group,
            &config.kafka_topic,
        )
        .context("creating kafka consumer")?,
    );

    let health = HealthRegistry::new(store.clone(), cache.clone(), broker.clone());
    let components = health.check_all().await;
    for component in &components {
        tracing::info!(component = component.name, status = ?component.status, "startup probe");
    }
    tracing::info!(overall = ?HealthRegistry::overall(&components), "startup health");

    let shutdown = CancellationToken::new();
    let stream = broker.start_consuming(shutdown.clone());
    let worker = IngestWorker::new(
        store.clone(),
        Duration::from_secs(config.insert_timeout_secs),
    );
    let worker_handle = tokio::spawn(worker.run(stream, shutdown.clone()));

    tracing::info!(
        topic = %config.kafka_topic,
        group = %config.kafka_consumer_group,
        "order ingestion running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");

    shutdown.cancel();
    worker_handle.await.context("joining ingest worker")?;

    tracing::info!("shutdown complete");
    Ok(())
}
