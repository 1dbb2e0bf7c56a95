use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use super::{DeadLetter, DeadLetterSink, SinkError};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer for the dead-letter topic, guarded by a circuit breaker so a
/// broker outage fails fast.
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Arc<Metrics>>,
}

impl KafkaDeadLetterSink {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()?;

        tracing::info!(brokers = %brokers, topic = %topic, "Dead letter producer ready");

        Ok(Self {
            producer,
            topic: topic.to_string(),
            circuit_breaker: CircuitBreaker::new("dead_letter", CircuitBreakerConfig::default()),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn send(&self, letter: &DeadLetter) -> Result<(), SinkError> {
        let headers = letter.headers();
        let owned = headers.iter().fold(OwnedHeaders::new(), |acc, h| {
            acc.insert(Header {
                key: h.key.as_str(),
                value: h.value.as_deref(),
            })
        });

        let mut record = FutureRecord::<[u8], [u8]>::to(&self.topic).headers(owned);
        if let Some(key) = letter.message.key.as_deref() {
            record = record.key(key);
        }
        if let Some(payload) = letter.message.payload.as_deref() {
            record = record.payload(payload);
        }

        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| SinkError::Kafka(e))
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn write(&self, letter: &DeadLetter) -> Result<(), SinkError> {
        let result = self.circuit_breaker.call(self.send(letter)).await;

        if let Some(metrics) = &self.metrics {
            metrics.update_circuit_breaker_state(self.circuit_breaker.state().await.as_gauge());
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    topic = %self.topic,
                    source_offset = letter.message.offset,
                    stage = letter.stage,
                    "Message sent to dead letter queue"
                );
                Ok(())
            }
            Err(CircuitBreakerError::Open(_)) => {
                tracing::error!(topic = %self.topic, "Circuit breaker open - dead letter topic unavailable");
                Err(SinkError::CircuitOpen)
            }
            Err(CircuitBreakerError::Inner(e)) => {
                tracing::error!(error = %e, topic = %self.topic, "Failed to publish dead letter");
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Dead letter flush task failed");
                SinkError::Kafka(rdkafka::error::KafkaError::Canceled)
            })?;

        flushed?;
        tracing::info!(topic = %self.topic, "Dead letter producer flushed");
        Ok(())
    }
}
