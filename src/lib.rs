//! Order ingestion and retrieval core.
//!
//! Two coupled paths share one aggregate and one durable store: a Kafka
//! ingestion pipeline (broker → ingest worker → postgres) and a cache-aside
//! read path (caller → retrieval composer → cache → postgres → cache).

pub mod broker;
pub mod cache;
pub mod config;
pub mod health;
pub mod ingest;
pub mod model;
pub mod retrieval;
pub mod retry;
pub mod store;
