// ============================================================================
// Order Service
// ============================================================================
//
// Cache-aside access to orders. Reads try the cache first and fall back to the
// store; writes go to the store first and populate the cache on success. The
// cache is never authoritative: its failures are logged and never fail a
// request.
//
// ============================================================================

mod order_service;

pub use order_service::{OrderService, OrderServiceError};
