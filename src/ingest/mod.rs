// ============================================================================
// Ingestion
// ============================================================================
//
// Sequential consume loop: fetch -> decode -> validate -> persist -> commit.
// Anything that fails before the commit is forwarded to the dead-letter sink.
//
// ============================================================================

mod pipeline;

pub use pipeline::{IngestPipeline, IngestStats, Outcome, PipelineConfig, ProcessingError};
