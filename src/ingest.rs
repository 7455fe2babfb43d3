use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{InboundMessage, StreamItem};
use crate::model::Order;
use crate::store::OrderStore;

// ============================================================================
// Ingestion Worker
// ============================================================================
//
// Drains the broker stream until cancellation or stream close, one message
// at a time. Failure classification decides the verdict: malformed payloads
// and permanent store errors (duplicate uid, bad timestamp) are committed
// away, since redelivery cannot fix them, while anything else is rejected so
// the broker redelivers. Ack/nack failures are logged, never fatal.
//
// ============================================================================

pub struct IngestWorker {
    store: Arc<dyn OrderStore>,
    insert_timeout: Duration,
}

impl IngestWorker {
    pub fn new(store: Arc<dyn OrderStore>, insert_timeout: Duration) -> Self {
        Self {
            store,
            insert_timeout,
        }
    }

    pub async fn run(self, mut stream: mpsc::Receiver<StreamItem>, shutdown: CancellationToken) {
        tracing::info!("ingest worker started");

        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => break,
                item = stream.recv() => match item {
                    Some(item) => item,
                    // Stream closed: cancellation or a terminal broker error.
                    None => break,
                },
            };

            match item {
                StreamItem::Error(err) => {
                    // The consumer already handled its own retry boundary.
                    tracing::warn!(error = %err, "broker stream error");
                }
                StreamItem::Message(msg) => self.process(msg).await,
            }
        }

        tracing::info!("ingest worker stopped");
    }

    async fn process(&self, msg: InboundMessage) {
        let order: Order = match serde_json::from_slice(&msg.payload) {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(error = %err, "malformed order payload, dropping message");
                if let Err(err) = msg.outcome.commit().await {
                    tracing::warn!(error = %err, "ack failed for dropped message");
                }
                return;
            }
        };

        let uid = order.order_uid.clone();
        let inserted =
            tokio::time::timeout(self.insert_timeout, self.store.insert_order(&order)).await;

        match inserted {
            Ok(Ok(())) => {
                tracing::info!(order_uid = %uid, "order ingested");
                if let Err(err) = msg.outcome.commit().await {
                    tracing::warn!(order_uid = %uid, error = %err, "ack failed");
                }
            }
            Ok(Err(err)) if err.is_permanent() => {
                tracing::warn!(
                    order_uid = %uid,
                    error = %err,
                    "permanent insert failure, dropping message"
                );
                if let Err(err) = msg.outcome.commit().await {
                    tracing::warn!(order_uid = %uid, error = %err, "ack failed for dropped message");
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(order_uid = %uid, error = %err, "insert failed, requeueing message");
                if let Err(err) = msg.outcome.reject().await {
                    tracing::warn!(order_uid = %uid, error = %err, "nack failed");
                }
            }
            Err(_elapsed) => {
                tracing::warn!(order_uid = %uid, "insert timed out, requeueing message");
                if let Err(err) = msg.outcome.reject().await {
                    tracing::warn!(order_uid = %uid, error = %err, "nack failed");
                }
            }
        }
    }
}
