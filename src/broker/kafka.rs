use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Broker, BrokerError, InboundMessage, MessageOutcome, OutcomeHandle, StreamItem};
use crate::retry::Backoff;

// ============================================================================
// Kafka Consumer Loop
// ============================================================================
//
// One partition-ordered pull loop: fetch, hand the message over, wait for
// the outcome, then commit or rewind before fetching again. Coordinator
// outages get their own exponential backoff budget; exhausting it ends
// consumption with a terminal error item. A fetch that times out with no
// data is a benign empty poll.
//
// ============================================================================

const POLL_TIMEOUT: Duration = Duration::from_secs(2);
const FETCH_BASE_DELAY: Duration = Duration::from_secs(2);
const FETCH_MAX_DELAY: Duration = Duration::from_secs(30);
const FETCH_MAX_RETRIES: u32 = 10;
const COMMIT_BASE_DELAY: Duration = Duration::from_secs(1);
const COMMIT_MAX_ATTEMPTS: u32 = 5;
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaBroker {
    consumer: Arc<StreamConsumer>,
}

impl KafkaBroker {
    pub fn new(brokers: &str, group: &str, topic: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "6000")
            .create()?;
        consumer.subscribe(&[topic])?;

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    fn start_consuming(&self, shutdown: CancellationToken) -> mpsc::Receiver<StreamItem> {
        // Capacity 1: at most one message in flight.
        let (tx, rx) = mpsc::channel(1);
        let consumer = self.consumer.clone();
        tokio::spawn(consume_loop(consumer, tx, shutdown));
        rx
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || {
            consumer.fetch_metadata(None, PROBE_TIMEOUT).map(|_| ())
        })
        .await
        .map_err(|err| BrokerError::Probe(err.to_string()))??;
        Ok(())
    }
}

fn is_coordinator_error(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::CoordinatorNotAvailable
                | RDKafkaErrorCode::NotCoordinator
        )
    )
}

fn is_timed_out(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::RequestTimedOut)
    )
}

async fn consume_loop(
    consumer: Arc<StreamConsumer>,
    tx: mpsc::Sender<StreamItem>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::exponential(FETCH_BASE_DELAY, FETCH_MAX_DELAY, FETCH_MAX_RETRIES);

    loop {
        let fetched = tokio::select! {
            _ = shutdown.cancelled() => break,
            fetched = tokio::time::timeout(POLL_TIMEOUT, consumer.recv()) => fetched,
        };

        let msg = match fetched {
            // Empty poll; nothing arrived within the window.
            Err(_elapsed) => continue,
            Ok(Err(err)) if is_coordinator_error(&err) => {
                match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            attempt = backoff.attempt(),
                            max_retries = FETCH_MAX_RETRIES,
                            delay_ms = delay.as_millis() as u64,
                            "group coordinator unavailable, backing off"
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    None => {
                        tracing::error!(
                            retries = FETCH_MAX_RETRIES,
                            "group coordinator unavailable, giving up"
                        );
                        let _ = tx
                            .send(StreamItem::Error(BrokerError::CoordinatorUnavailable {
                                retries: FETCH_MAX_RETRIES,
                            }))
                            .await;
                        break;
                    }
                }
            }
            Ok(Err(err)) if is_timed_out(&err) => continue,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "message fetch failed");
                if tx.send(StreamItem::Error(err.into())).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Ok(msg)) => {
                backoff.reset();
                msg
            }
        };

        let payload = msg.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let (handle, outcome_rx) = OutcomeHandle::pair();
        if tx
            .send(StreamItem::Message(InboundMessage {
                payload,
                outcome: handle,
            }))
            .await
            .is_err()
        {
            break;
        }

        // Hold the fetch until this message's fate is decided.
        let resolved = tokio::select! {
            _ = shutdown.cancelled() => break,
            resolved = outcome_rx.resolved() => resolved,
        };
        match resolved {
            // Handle dropped without a verdict; the offset stays uncommitted.
            None => continue,
            Some((MessageOutcome::Commit, reply)) => {
                let result = commit_with_retry(consumer.clone(), &msg, shutdown.clone()).await;
                reply.send(result);
            }
            Some((MessageOutcome::Reject, reply)) => {
                let result = rewind(&consumer, &msg);
                reply.send(result);
            }
        }
    }

    tracing::info!("consumer loop stopped");
}

/// Commit the position after the message, retrying coordinator outages with
/// linear backoff. Any other commit error is returned as-is. The synchronous
/// commit round trip runs on a blocking thread, like the metadata probe, so
/// the runtime stays responsive.
async fn commit_with_retry(
    consumer: Arc<StreamConsumer>,
    msg: &BorrowedMessage<'_>,
    shutdown: CancellationToken,
) -> Result<(), BrokerError> {
    let position = commit_position(msg.topic(), msg.partition(), msg.offset())?;

    tokio::task::spawn_blocking(move || {
        let mut backoff = Backoff::linear(COMMIT_BASE_DELAY, COMMIT_MAX_ATTEMPTS - 1);
        loop {
            match consumer.commit(&position, CommitMode::Sync) {
                Ok(()) => return Ok(()),
                Err(err) if is_coordinator_error(&err) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "offset commit hit coordinator outage, retrying"
                        );
                        if shutdown.is_cancelled() {
                            return Err(BrokerError::ConsumerClosed);
                        }
                        std::thread::sleep(delay);
                    }
                    None => {
                        return Err(BrokerError::CommitFailed {
                            attempts: COMMIT_MAX_ATTEMPTS,
                            source: err,
                        })
                    }
                },
                Err(err) => return Err(err.into()),
            }
        }
    })
    .await
    .map_err(|_| BrokerError::ConsumerClosed)?
}

/// The committed offset for a consumed message is the offset after it.
fn commit_position(
    topic: &str,
    partition: i32,
    offset: i64,
) -> Result<TopicPartitionList, BrokerError> {
    let mut position = TopicPartitionList::new();
    position.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
    Ok(position)
}

/// Rewind the read position to the rejected message so the next fetch
/// redelivers it.
fn rewind(consumer: &StreamConsumer, msg: &BorrowedMessage<'_>) -> Result<(), BrokerError> {
    consumer.seek(
        msg.topic(),
        msg.partition(),
        Offset::Offset(msg.offset()),
        SEEK_TIMEOUT,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_outages_are_distinguished_from_other_fetch_errors() {
        let coordinator =
            KafkaError::MessageConsumption(RDKafkaErrorCode::CoordinatorNotAvailable);
        let not_coordinator =
            KafkaError::MessageConsumption(RDKafkaErrorCode::NotCoordinator);
        let unrelated = KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition);

        assert!(is_coordinator_error(&coordinator));
        assert!(is_coordinator_error(&not_coordinator));
        assert!(!is_coordinator_error(&unrelated));
    }

    #[test]
    fn fetch_timeouts_are_benign() {
        let timed_out = KafkaError::MessageConsumption(RDKafkaErrorCode::RequestTimedOut);
        assert!(is_timed_out(&timed_out));
        assert!(!is_coordinator_error(&timed_out));
    }

    #[test]
    fn commit_position_targets_the_offset_after_the_message() {
        let position = commit_position("orders", 2, 41).unwrap();
        let elements = position.elements_for_topic("orders");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].partition(), 2);
        assert_eq!(elements[0].offset(), Offset::Offset(42));
    }

    #[test]
    fn fetch_backoff_matches_the_consumer_budget() {
        let mut backoff =
            Backoff::exponential(FETCH_BASE_DELAY, FETCH_MAX_DELAY, FETCH_MAX_RETRIES);
        let mut total = 0;
        while let Some(delay) = backoff.next_delay() {
            assert!(delay <= FETCH_MAX_DELAY);
            total += 1;
        }
        assert_eq!(total, FETCH_MAX_RETRIES);
    }
}
