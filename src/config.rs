use std::str::FromStr;

/// Which cache backend backs the read path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheType {
    Memory,
    Redis,
}

impl FromStr for CacheType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(CacheType::Memory),
            "redis" => Ok(CacheType::Redis),
            _ => Err(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub kafka_url: String,
    pub kafka_topic: String,
    pub kafka_consumer_group: String,
    pub cache_type: CacheType,
    pub redis_url: String,
    /// Entry limit for the in-memory cache
    pub cache_capacity: usize,
    /// Per-attempt bound on a store insert during ingestion
    pub insert_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            kafka_url: std::env::var("KAFKA_URL").unwrap_or_else(|_| "localhost:9092".into()),
            kafka_topic: std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| "orders".into()),
            kafka_consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "order-ingest".into()),
            cache_type: Self::parse("CACHE_TYPE", CacheType::Memory)?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            cache_capacity: Self::parse("CACHE_CAPACITY", 10)?,
            insert_timeout_secs: Self::parse("INSERT_TIMEOUT_SECS", 5)?,
        })
    }

    fn parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
        match std::env::var(key) {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
            Err(_) => Ok(default),
        }
    }
}
