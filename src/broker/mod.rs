use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub mod kafka;

pub use kafka::KafkaBroker;

// ============================================================================
// Broker Contract
// ============================================================================
//
// The consumer emits exactly one in-flight message at a time: the next fetch
// does not happen until the current message's outcome handle is resolved (or
// dropped). The handle is the only coupling between the worker and the
// broker: commit/reject are capabilities, not closures over client state.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Terminal: the coordinator stayed unreachable through the whole
    /// backoff budget and consumption ended.
    #[error("group coordinator unavailable after {retries} retries")]
    CoordinatorUnavailable { retries: u32 },

    #[error("offset commit failed after {attempts} attempts: {source}")]
    CommitFailed {
        attempts: u32,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    #[error("consumer loop closed before the outcome was handled")]
    ConsumerClosed,

    #[error("liveness probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// One item on the consumption stream: a delivered message awaiting its
/// outcome, or a non-fatal fetch error.
#[derive(Debug)]
pub enum StreamItem {
    Message(InboundMessage),
    Error(BrokerError),
}

#[derive(Debug)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub outcome: OutcomeHandle,
}

/// The verdict a consumer of the stream passes back for a message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageOutcome {
    /// Commit the message's position; the message is done (or dropped).
    Commit,
    /// Rewind so the broker redelivers the same message.
    Reject,
}

type OutcomeRequest = (MessageOutcome, oneshot::Sender<Result<(), BrokerError>>);

/// Single-use handle resolving one in-flight message. Dropping it without a
/// verdict leaves the offset uncommitted, so the message redelivers after a
/// restart and at-least-once is preserved either way.
#[derive(Debug)]
pub struct OutcomeHandle {
    tx: oneshot::Sender<OutcomeRequest>,
}

impl OutcomeHandle {
    pub fn pair() -> (OutcomeHandle, OutcomeReceiver) {
        let (tx, rx) = oneshot::channel();
        (OutcomeHandle { tx }, OutcomeReceiver { rx })
    }

    /// Acknowledge the message; the broker side runs its bounded commit
    /// retry and reports the result.
    pub async fn commit(self) -> Result<(), BrokerError> {
        self.resolve(MessageOutcome::Commit).await
    }

    /// Reject the message for redelivery.
    pub async fn reject(self) -> Result<(), BrokerError> {
        self.resolve(MessageOutcome::Reject).await
    }

    async fn resolve(self, outcome: MessageOutcome) -> Result<(), BrokerError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send((outcome, done_tx))
            .map_err(|_| BrokerError::ConsumerClosed)?;
        done_rx.await.map_err(|_| BrokerError::ConsumerClosed)?
    }
}

/// Broker-side end of an outcome handle.
#[derive(Debug)]
pub struct OutcomeReceiver {
    rx: oneshot::Receiver<OutcomeRequest>,
}

impl OutcomeReceiver {
    /// Wait for the verdict. `None` means the handle was dropped without one.
    pub async fn resolved(self) -> Option<(MessageOutcome, OutcomeReply)> {
        match self.rx.await {
            Ok((outcome, done_tx)) => Some((outcome, OutcomeReply { done_tx })),
            Err(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct OutcomeReply {
    done_tx: oneshot::Sender<Result<(), BrokerError>>,
}

impl OutcomeReply {
    pub fn send(self, result: Result<(), BrokerError>) {
        // The handle side may have been dropped meanwhile; nothing to do.
        let _ = self.done_tx.send(result);
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Spawn the consumption loop; the returned stream closes on cancellation
    /// or on a terminal error.
    fn start_consuming(&self, shutdown: CancellationToken) -> mpsc::Receiver<StreamItem>;

    /// Side-effect-free liveness probe.
    async fn health_check(&self) -> Result<(), BrokerError>;
}
