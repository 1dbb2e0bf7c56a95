// ============================================================================
// Messaging
// ============================================================================
//
// Capability interfaces over the order topic and the dead-letter topic, plus
// their Kafka implementations.
//
// - `MessageSource`: at-least-once consumption with explicit commits
// - `DeadLetterSink`: one-way publication of messages that could not be
//   ingested, with the failure reason attached as a header
//
// ============================================================================

mod dead_letter;
mod kafka_source;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use rdkafka::error::KafkaError;

pub use dead_letter::KafkaDeadLetterSink;
pub use kafka_source::KafkaOrderSource;

/// Header carrying the human-readable failure reason
pub const ERROR_HEADER: &str = "error";
/// Header naming the pipeline stage that failed
pub const ERROR_STAGE_HEADER: &str = "error-stage";
/// Headers identifying the source record, for de-duplication downstream
pub const ORIGIN_TOPIC_HEADER: &str = "x-origin-topic";
pub const ORIGIN_PARTITION_HEADER: &str = "x-origin-partition";
pub const ORIGIN_OFFSET_HEADER: &str = "x-origin-offset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl MessageHeader {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// One record fetched from the order topic, owned and detached from the
/// client that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<MessageHeader>,
}

impl InboundMessage {
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }

    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .and_then(|h| h.value.as_deref())
    }
}

/// A message that could not be ingested, on its way to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message: InboundMessage,
    pub reason: String,
    pub stage: &'static str,
}

impl DeadLetter {
    pub fn new(message: InboundMessage, reason: impl Into<String>, stage: &'static str) -> Self {
        Self {
            message,
            reason: reason.into(),
            stage,
        }
    }

    /// Original headers in order, then the failure and origin headers.
    pub fn headers(&self) -> Vec<MessageHeader> {
        let m = &self.message;
        let mut headers = m.headers.clone();
        headers.push(MessageHeader::new(ERROR_HEADER, self.reason.as_str()));
        headers.push(MessageHeader::new(ERROR_STAGE_HEADER, self.stage));
        headers.push(MessageHeader::new(ORIGIN_TOPIC_HEADER, m.topic.as_str()));
        headers.push(MessageHeader::new(ORIGIN_PARTITION_HEADER, m.partition.to_string()));
        headers.push(MessageHeader::new(ORIGIN_OFFSET_HEADER, m.offset.to_string()));
        headers
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The stream has no more messages and never will
    #[error("message stream ended")]
    EndOfStream,

    #[error("source closed")]
    Closed,

    #[error("kafka consumer error: {0}")]
    Kafka(#[from] KafkaError),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("dead letter producer unavailable: circuit breaker open")]
    CircuitOpen,

    #[error("kafka producer error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Ordered, at-least-once stream of order messages.
///
/// A message is only considered consumed once it has been committed; on
/// restart consumption resumes after the last committed message.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message. `SourceError::EndOfStream` when exhausted.
    async fn fetch(&self) -> Result<InboundMessage, SourceError>;

    /// Mark `message` and everything before it in its partition as consumed.
    async fn commit(&self, message: &InboundMessage) -> Result<(), SourceError>;

    async fn close(&self) -> Result<(), SourceError>;
}

/// Destination for messages that failed ingestion.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Publish the original key and payload with the failure headers.
    async fn write(&self, letter: &DeadLetter) -> Result<(), SinkError>;

    /// Flush outstanding writes and release the producer.
    async fn close(&self) -> Result<(), SinkError>;
}
