use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Ingestion outcomes and per-message latency
// - Dead-letter writes by failure stage
// - Persist retries
// - Cache effectiveness (hits, misses, errors, live entries)
// - Dead-letter producer circuit breaker state
//
// All metrics live in a private registry served at GET /metrics.
// ============================================================================

/// Label values for `ingest_messages_total`
pub mod outcome {
    pub const PERSISTED: &str = "persisted";
    pub const DEAD_LETTERED: &str = "dead_lettered";
    pub const DEAD_LETTER_FAILED: &str = "dead_letter_failed";
}

/// Label values for `cache_lookups_total`
pub mod lookup {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const ERROR: &str = "error";
}

pub struct Metrics {
    registry: Registry,

    // Ingestion
    pub ingest_messages_total: IntCounterVec,
    pub ingest_processing_duration: HistogramVec,
    pub ingest_fetch_errors_total: IntCounter,
    pub persist_retry_attempts_total: IntCounter,

    // Dead letters
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_stage: IntCounterVec,
    pub circuit_breaker_state: IntGauge,

    // Cache
    pub cache_lookups_total: IntCounterVec,
    pub cache_entries: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ingest_messages_total = IntCounterVec::new(
            Opts::new("ingest_messages_total", "Consumed order messages by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_messages_total.clone()))?;

        let ingest_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "ingest_processing_duration_seconds",
                "Time from fetch to commit or dead-letter",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_processing_duration.clone()))?;

        let ingest_fetch_errors_total = IntCounter::new(
            "ingest_fetch_errors_total",
            "Failed fetches from the order topic",
        )?;
        registry.register(Box::new(ingest_fetch_errors_total.clone()))?;

        let persist_retry_attempts_total = IntCounter::new(
            "persist_retry_attempts_total",
            "Repeated save attempts after a transient store failure",
        )?;
        registry.register(Box::new(persist_retry_attempts_total.clone()))?;

        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Messages written to the dead letter topic",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_stage = IntCounterVec::new(
            Opts::new("dlq_messages_by_stage", "Dead letters by failing stage"),
            &["stage"],
        )?;
        registry.register(Box::new(dlq_messages_by_stage.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "dlq_circuit_breaker_state",
            "Dead letter producer circuit breaker (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Order cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let cache_entries = IntGauge::new("cache_entries", "Live entries in the order cache")?;
        registry.register(Box::new(cache_entries.clone()))?;

        Ok(Self {
            registry,
            ingest_messages_total,
            ingest_processing_duration,
            ingest_fetch_errors_total,
            persist_retry_attempts_total,
            dlq_messages_total,
            dlq_messages_by_stage,
            circuit_breaker_state,
            cache_lookups_total,
            cache_entries,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn record_ingest(&self, outcome: &str, duration_secs: f64) {
        self.ingest_messages_total.with_label_values(&[outcome]).inc();
        self.ingest_processing_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn record_fetch_error(&self) {
        self.ingest_fetch_errors_total.inc();
    }

    pub fn record_persist_retry(&self) {
        self.persist_retry_attempts_total.inc();
    }

    pub fn record_dlq_message(&self, stage: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_stage.with_label_values(&[stage]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    pub fn record_cache_lookup(&self, result: &str) {
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries.set(entries as i64);
    }
}
