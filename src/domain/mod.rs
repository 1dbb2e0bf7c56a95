// ============================================================================
// Domain Layer
// ============================================================================
//
// Business data and its invariants. Completely independent of the cache,
// the durable store and the message transport.
//
// ============================================================================

pub mod order;
