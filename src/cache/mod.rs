// ============================================================================
// Order Cache
// ============================================================================
//
// In-process, time-expiring cache keyed by `order_uid`.
//
// - `OrderCache` is the capability the order service depends on, so the
//   service can be exercised against failing caches in tests.
// - `TtlCache` is the production implementation: one RwLock around the map,
//   isolated copies in and out, lazy expiry on read plus a background sweep.
//
// Cache operations never perform I/O.
//
// ============================================================================

mod ttl_cache;

use std::collections::HashMap;

use crate::domain::order::Order;

pub use ttl_cache::{TtlCache, MIN_SWEEP_INTERVAL};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cannot cache an order without order_uid")]
    MissingKey,

    #[error("cache state lock poisoned by a panicking writer")]
    Poisoned,
}

/// Capability interface over the order cache.
///
/// Every value handed out is an owned copy; callers can never hold a
/// reference into cache-internal memory.
pub trait OrderCache: Send + Sync {
    /// Store a copy of `order`, replacing any previous entry.
    fn set(&self, order: &Order) -> Result<(), CacheError>;

    /// Copy of the live entry, `None` when absent or expired.
    fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError>;

    /// Copies of all live entries keyed by `order_uid`.
    fn get_all(&self) -> Result<HashMap<String, Order>, CacheError>;

    /// Remove an entry. Absent keys are ignored.
    fn delete(&self, order_uid: &str);

    /// Number of live entries.
    fn count(&self) -> usize;

    /// Seed many entries under a single write lock.
    ///
    /// Orders without an `order_uid` are skipped. Returns how many were stored.
    fn bulk_load(&self, orders: &[Order]) -> Result<usize, CacheError>;
}
