use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{OrderRepository, StoreError};
use crate::domain::order::Order;

/// In-memory repository for tests.
///
/// Enforces the same uniqueness as the real schema (`order_uid` and payment
/// `transaction`) and can be told to fail upcoming calls.
#[derive(Default)]
pub(crate) struct InMemoryOrderRepository {
    orders: Mutex<HashMap<String, Order>>,
    save_failures: Mutex<VecDeque<StoreError>>,
    get_failures: Mutex<VecDeque<StoreError>>,
    get_all_failures: Mutex<VecDeque<StoreError>>,
    save_calls: AtomicUsize,
    get_calls: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryOrderRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let repo = Self::new();
        {
            let mut stored = repo.orders.lock().unwrap();
            for order in orders {
                stored.insert(order.order_uid.clone(), order);
            }
        }
        repo
    }

    /// Queue an error for the next `save_order` call
    pub(crate) fn fail_next_save(&self, err: StoreError) {
        self.save_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_get(&self, err: StoreError) {
        self.get_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_get_all(&self, err: StoreError) {
        self.get_all_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn stored(&self, order_uid: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_uid).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub(crate) fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get_order(&self, order_uid: &str) -> Result<Order, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.get_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.stored(order_uid)
            .ok_or_else(|| StoreError::NotFound(order_uid.to_string()))
    }

    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.save_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut orders = self.orders.lock().unwrap();
        let duplicate = orders.contains_key(&order.order_uid)
            || orders
                .values()
                .any(|o| o.payment.transaction == order.payment.transaction);
        if duplicate {
            return Err(StoreError::Conflict {
                order_uid: order.order_uid.clone(),
            });
        }

        orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        if let Some(err) = self.get_all_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut all: Vec<Order> = self.orders.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.date_created.cmp(&a.date_created));
        Ok(all)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::minimal_order;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_duplicate_payment_transaction_is_conflict() {
        let repo = InMemoryOrderRepository::new();
        let first = minimal_order("o1");
        let mut second = minimal_order("o2");
        second.payment.transaction = first.payment.transaction.clone();

        repo.save_order(&first).await.unwrap();
        let result = repo.save_order(&second).await;

        assert!(matches!(result, Err(StoreError::Conflict { ref order_uid }) if order_uid == "o2"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_get_all_is_newest_first() {
        let older = minimal_order("old");
        let mut newer = minimal_order("new");
        newer.date_created = older.date_created + ChronoDuration::hours(1);
        let repo = InMemoryOrderRepository::with_orders([older, newer]);

        let all = repo.get_all_orders().await.unwrap();

        let uids: Vec<_> = all.iter().map(|o| o.order_uid.as_str()).collect();
        assert_eq!(uids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_queued_failure_is_returned_once() {
        let repo = InMemoryOrderRepository::new();
        repo.fail_next_save(StoreError::Database(sqlx::Error::PoolTimedOut));

        assert!(repo.save_order(&minimal_order("o1")).await.is_err());
        assert!(repo.save_order(&minimal_order("o1")).await.is_ok());
        assert_eq!(repo.save_calls(), 2);
    }
}
