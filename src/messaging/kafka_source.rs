use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use super::{InboundMessage, MessageHeader, MessageSource, SourceError};

/// Consumer-group member on the order topic.
///
/// Auto-commit is off: offsets only move when the pipeline commits a
/// message. A group without committed offsets starts from the earliest one.
/// Commits are synchronous: `commit` returns only once the group coordinator
/// has acknowledged the offset.
pub struct KafkaOrderSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaOrderSource {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "10000")
            .create()?;

        consumer.subscribe(&[topic])?;

        info!(
            brokers = %brokers,
            group_id = %group_id,
            topic = %topic,
            "Subscribed to order topic"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: topic.to_string(),
        })
    }
}

/// Offsets to commit for `message`: the committed offset is the next one to
/// read.
fn commit_offsets(message: &InboundMessage) -> Result<TopicPartitionList, KafkaError> {
    let mut offsets = TopicPartitionList::new();
    offsets.add_partition_offset(
        &message.topic,
        message.partition,
        Offset::Offset(message.offset + 1),
    )?;
    Ok(offsets)
}

fn to_inbound(msg: &BorrowedMessage<'_>) -> InboundMessage {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| MessageHeader {
                    key: h.key.to_string(),
                    value: h.value.map(<[u8]>::to_vec),
                })
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        payload: msg.payload().map(<[u8]>::to_vec),
        headers,
    }
}

#[async_trait]
impl MessageSource for KafkaOrderSource {
    async fn fetch(&self) -> Result<InboundMessage, SourceError> {
        match self.consumer.recv().await {
            Ok(msg) => {
                let inbound = to_inbound(&msg);
                debug!(
                    topic = %inbound.topic,
                    partition = inbound.partition,
                    offset = inbound.offset,
                    "Fetched message"
                );
                Ok(inbound)
            }
            Err(KafkaError::PartitionEOF(partition)) => {
                debug!(partition = partition, "Reached end of partition");
                Err(SourceError::EndOfStream)
            }
            Err(e) => Err(SourceError::Kafka(e)),
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), SourceError> {
        let offsets = commit_offsets(message)?;

        // Sync commit blocks on the coordinator round trip
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Offset commit task failed");
                SourceError::Kafka(KafkaError::Canceled)
            })??;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Committed offset"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Order consumer closed");
        Ok(())
    }
}
