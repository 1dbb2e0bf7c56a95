// ============================================================================
// Durable Store
// ============================================================================
//
// The durable store is the source of truth. It persists the whole order
// aggregate in one transaction and enforces uniqueness of `order_uid` and of
// the payment `transaction`.
//
// - `OrderRepository` is the capability the order service depends on
// - `PostgresOrderRepository` is the production implementation (sqlx)
// - `InMemoryOrderRepository` is a test double with the same uniqueness rules
//
// ============================================================================

mod postgres;
mod schema;

#[cfg(test)]
pub(crate) mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::order::Order;
use crate::utils::IsTransient;

pub use postgres::PostgresOrderRepository;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("order {order_uid} conflicts with an existing order or payment transaction")]
    Conflict { order_uid: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("order {order_uid} is incomplete in storage: no {missing} row")]
    Incomplete {
        order_uid: String,
        missing: &'static str,
    },

    #[error("stored order could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IsTransient for StoreError {
    /// Connectivity and timeout failures may succeed on a later attempt.
    /// Everything the database actively rejected will not.
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout { .. } => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::NotFound(_)
            | StoreError::Conflict { .. }
            | StoreError::Incomplete { .. }
            | StoreError::Decode(_) => false,
        }
    }
}

/// Capability interface over the durable order store.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Load the full aggregate. `StoreError::NotFound` when absent.
    async fn get_order(&self, order_uid: &str) -> Result<Order, StoreError>;

    /// Persist the full aggregate atomically.
    ///
    /// `StoreError::Conflict` when the order or its payment transaction
    /// already exists; the stored data is left untouched in that case.
    async fn save_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Every stored order, newest `date_created` first.
    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release connections. Further calls fail.
    async fn close(&self) -> Result<(), StoreError>;
}
