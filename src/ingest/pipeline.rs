use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::order::{Order, ValidationError};
use crate::messaging::{DeadLetter, DeadLetterSink, InboundMessage, MessageSource, SourceError};
use crate::metrics::{outcome, Metrics};
use crate::service::{OrderService, OrderServiceError};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Ingestion Pipeline
// ============================================================================
//
// One message at a time, in delivery order. A message is committed only once
// its order is persisted. A failed message is dead-lettered and, unless
// `commit_dead_lettered` is set, left uncommitted so the source redelivers it
// after a restart; the dead letter carries the origin coordinates so
// downstream consumers can drop the duplicates.
//
// Cancellation is observed only between messages: a message that has been
// fetched is always carried through to commit or dead letter.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on persisting one message, retries included
    pub message_timeout: Duration,
    /// Commit the offset of a message once its dead letter is written
    pub commit_dead_lettered: bool,
    pub persist_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(10),
            commit_dead_lettered: false,
            persist_retry: RetryConfig::persist(),
        }
    }
}

/// Why a message was not ingested
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("message has no payload")]
    EmptyPayload,

    #[error("invalid order JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid order: {0}")]
    Validate(#[from] ValidationError),

    #[error("persist failed after {attempts} attempt(s): {source}")]
    Persist {
        attempts: u32,
        source: OrderServiceError,
    },

    #[error("persist timed out after {0:?}")]
    Timeout(Duration),
}

impl ProcessingError {
    /// Pipeline stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            ProcessingError::EmptyPayload | ProcessingError::Decode(_) => "decode",
            ProcessingError::Validate(_) => "validate",
            ProcessingError::Persist { .. } | ProcessingError::Timeout(_) => "persist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Persisted,
    DeadLettered,
    /// Neither persisted nor dead-lettered; left for redelivery
    DeadLetterFailed,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Persisted => outcome::PERSISTED,
            Outcome::DeadLettered => outcome::DEAD_LETTERED,
            Outcome::DeadLetterFailed => outcome::DEAD_LETTER_FAILED,
        }
    }
}

/// Counters for one `run`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub persisted: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    pub fetch_errors: u64,
}

impl IngestStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Persisted => self.persisted += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::DeadLetterFailed => self.dead_letter_failures += 1,
        }
    }
}

pub struct IngestPipeline {
    source: Arc<dyn MessageSource>,
    sink: Arc<dyn DeadLetterSink>,
    service: Arc<OrderService>,
    config: PipelineConfig,
    metrics: Option<Arc<Metrics>>,
}

impl IngestPipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn DeadLetterSink>,
        service: Arc<OrderService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            sink,
            service,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consume until `shutdown` is cancelled or the source ends.
    ///
    /// Fetch errors other than end-of-stream are logged and the fetch is
    /// retried; they never stop the loop.
    pub async fn run(&self, shutdown: CancellationToken) -> IngestStats {
        info!(
            commit_dead_lettered = self.config.commit_dead_lettered,
            message_timeout_ms = self.config.message_timeout.as_millis() as u64,
            "Ingestion pipeline started"
        );

        let mut stats = IngestStats::default();

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping ingestion");
                    break;
                }
                fetched = self.source.fetch() => fetched,
            };

            match fetched {
                Ok(message) => stats.record(self.handle(&message).await),
                Err(SourceError::EndOfStream) => {
                    info!("Message stream ended");
                    break;
                }
                Err(SourceError::Closed) => {
                    info!("Message source closed");
                    break;
                }
                Err(e) => {
                    stats.fetch_errors += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fetch_error();
                    }
                    error!(error = %e, "Failed to fetch message");
                }
            }
        }

        info!(
            persisted = stats.persisted,
            dead_lettered = stats.dead_lettered,
            dead_letter_failures = stats.dead_letter_failures,
            fetch_errors = stats.fetch_errors,
            "Ingestion pipeline stopped"
        );
        stats
    }

    /// Carry one message through to commit or dead letter.
    pub async fn handle(&self, message: &InboundMessage) -> Outcome {
        let started = Instant::now();

        let outcome = match self.process(message).await {
            Ok(order_uid) => {
                self.commit(message).await;
                debug!(
                    order_uid = %order_uid,
                    partition = message.partition,
                    offset = message.offset,
                    "Order ingested"
                );
                Outcome::Persisted
            }
            Err(err) => self.dead_letter(message, err).await,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_ingest(outcome.label(), started.elapsed().as_secs_f64());
        }
        outcome
    }

    async fn process(&self, message: &InboundMessage) -> Result<String, ProcessingError> {
        let payload = message
            .payload
            .as_deref()
            .ok_or(ProcessingError::EmptyPayload)?;
        let order: Order = serde_json::from_slice(payload)?;
        order.validate()?;
        self.persist(&order).await?;
        Ok(order.order_uid)
    }

    async fn persist(&self, order: &Order) -> Result<(), ProcessingError> {
        let limit = self.config.message_timeout;
        let service = self.service.as_ref();
        let metrics = self.metrics.as_deref();

        let save = retry_on_transient(&self.config.persist_retry, "save_order", move |attempt| async move {
            if attempt > 1 {
                if let Some(metrics) = metrics {
                    metrics.record_persist_retry();
                }
            }
            service.save_order(order).await
        });

        match tokio::time::timeout(limit, save).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProcessingError::Persist {
                attempts: e.attempts(),
                source: e.into_inner(),
            }),
            Err(_) => Err(ProcessingError::Timeout(limit)),
        }
    }

    async fn dead_letter(&self, message: &InboundMessage, err: ProcessingError) -> Outcome {
        let stage = err.stage();
        error!(
            partition = message.partition,
            offset = message.offset,
            key = message.key_str().unwrap_or_default(),
            stage = stage,
            error = %err,
            "Failed to process message, sending to dead letter queue"
        );

        let letter = DeadLetter::new(message.clone(), err.to_string(), stage);
        if let Err(e) = self.sink.write(&letter).await {
            error!(
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to send to dead letter queue"
            );
            return Outcome::DeadLetterFailed;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_dlq_message(stage);
        }

        if self.config.commit_dead_lettered {
            self.commit(message).await;
        }
        Outcome::DeadLettered
    }

    async fn commit(&self, message: &InboundMessage) {
        if let Err(e) = self.source.commit(message).await {
            error!(
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to commit message"
            );
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
