use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cache::OrderCache;
use crate::domain::order::Order;
use crate::metrics::{lookup, Metrics};
use crate::store::{OrderRepository, StoreError};
use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    #[error("order_uid is required")]
    MissingOrderUid,

    #[error("order {0} not found")]
    NotFound(String),

    #[error("order {0} already exists")]
    Conflict(String),

    /// Any other store failure, unchanged
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrderServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uid) => OrderServiceError::NotFound(uid),
            StoreError::Conflict { order_uid } => OrderServiceError::Conflict(order_uid),
            other => OrderServiceError::Store(other),
        }
    }
}

impl IsTransient for OrderServiceError {
    fn is_transient(&self) -> bool {
        match self {
            OrderServiceError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub struct OrderService {
    cache: Arc<dyn OrderCache>,
    repo: Arc<dyn OrderRepository>,
    metrics: Option<Arc<Metrics>>,
}

impl OrderService {
    pub fn new(cache: Arc<dyn OrderCache>, repo: Arc<dyn OrderRepository>) -> Self {
        Self {
            cache,
            repo,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cache first, then the store. A store hit is written back to the cache.
    ///
    /// Absent orders are not cached, so an order persisted later becomes
    /// visible on the next read.
    pub async fn get_order(&self, order_uid: &str) -> Result<Order, OrderServiceError> {
        match self.cache.get(order_uid) {
            Ok(Some(order)) => {
                self.record_lookup(lookup::HIT);
                debug!(order_uid = %order_uid, "Order served from cache");
                return Ok(order);
            }
            Ok(None) => self.record_lookup(lookup::MISS),
            Err(e) => {
                self.record_lookup(lookup::ERROR);
                warn!(order_uid = %order_uid, error = %e, "Cache read failed, falling back to store");
            }
        }

        let order = match self.repo.get_order(order_uid).await {
            Ok(order) => order,
            Err(StoreError::NotFound(uid)) => {
                debug!(order_uid = %uid, "Order not found");
                return Err(OrderServiceError::NotFound(uid));
            }
            Err(e) => {
                error!(order_uid = %order_uid, error = %e, "Failed to load order from store");
                return Err(OrderServiceError::Store(e));
            }
        };

        if let Err(e) = self.cache.set(&order) {
            warn!(order_uid = %order_uid, error = %e, "Failed to cache loaded order");
        }

        Ok(order)
    }

    /// Persist then cache. The cache is only touched after the store
    /// accepted the order.
    pub async fn save_order(&self, order: &Order) -> Result<(), OrderServiceError> {
        if order.order_uid.is_empty() {
            return Err(OrderServiceError::MissingOrderUid);
        }

        if let Err(e) = self.repo.save_order(order).await {
            return Err(match e {
                StoreError::Conflict { order_uid } => {
                    info!(order_uid = %order_uid, "Order already exists");
                    OrderServiceError::Conflict(order_uid)
                }
                other => {
                    error!(order_uid = %order.order_uid, error = %other, "Failed to save order");
                    OrderServiceError::Store(other)
                }
            });
        }

        if let Err(e) = self.cache.set(order) {
            warn!(order_uid = %order.order_uid, error = %e, "Order saved but not cached");
        }

        info!(order_uid = %order.order_uid, items = order.items.len(), "Order saved");
        Ok(())
    }

    /// Every stored order, newest first. Never consults the cache.
    pub async fn get_all_orders(&self) -> Result<Vec<Order>, OrderServiceError> {
        self.repo.get_all_orders().await.map_err(OrderServiceError::from)
    }

    /// Seed the cache with every stored order.
    ///
    /// A cache failure is logged and reported as zero loaded orders; a store
    /// failure is returned.
    pub async fn warm_cache(&self) -> Result<usize, OrderServiceError> {
        let orders = self.get_all_orders().await?;

        match self.cache.bulk_load(&orders) {
            Ok(loaded) => {
                info!(loaded = loaded, stored = orders.len(), "Cache warmed from store");
                Ok(loaded)
            }
            Err(e) => {
                warn!(error = %e, "Cache warm-up failed, starting cold");
                Ok(0)
            }
        }
    }

    pub fn cached_orders(&self) -> usize {
        self.cache.count()
    }

    fn record_lookup(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(result);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::cache::{CacheError, TtlCache};
    use crate::domain::order::fixtures::{minimal_order, sample_order};
    use crate::store::memory::InMemoryOrderRepository;

    /// Cache whose every operation fails
    #[derive(Default)]
    struct BrokenCache {
        sets: AtomicUsize,
    }

    impl OrderCache for BrokenCache {
        fn set(&self, _order: &Order) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Poisoned)
        }
        fn get(&self, _order_uid: &str) -> Result<Option<Order>, CacheError> {
            Err(CacheError::Poisoned)
        }
        fn get_all(&self) -> Result<HashMap<String, Order>, CacheError> {
            Err(CacheError::Poisoned)
        }
        fn delete(&self, _order_uid: &str) {}
        fn count(&self) -> usize {
            0
        }
        fn bulk_load(&self, _orders: &[Order]) -> Result<usize, CacheError> {
            Err(CacheError::Poisoned)
        }
    }

    fn service_with(
        repo: Arc<InMemoryOrderRepository>,
    ) -> (OrderService, Arc<TtlCache>) {
        let cache = Arc::new(TtlCache::new(Duration::ZERO));
        let service = OrderService::new(cache.clone(), repo);
        (service, cache)
    }

    #[tokio::test]
    async fn test_get_order_cache_hit_skips_store() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let (service, cache) = service_with(repo.clone());
        cache.set(&minimal_order("o1")).unwrap();

        let order = service.get_order("o1").await.unwrap();

        assert_eq!(order.order_uid, "o1");
        assert_eq!(repo.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_get_order_miss_loads_and_caches() {
        let repo = Arc::new(InMemoryOrderRepository::with_orders([sample_order("o1")]));
        let (service, cache) = service_with(repo.clone());

        let first = service.get_order("o1").await.unwrap();
        let second = service.get_order("o1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.get_calls(), 1);
        assert_eq!(cache.count(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let (service, cache) = service_with(repo.clone());

        let result = service.get_order("ghost").await;

        assert!(matches!(result, Err(OrderServiceError::NotFound(ref uid)) if uid == "ghost"));
        assert_eq!(cache.count(), 0);

        // Becomes visible once it is stored
        repo.save_order(&minimal_order("ghost")).await.unwrap();
        assert!(service.get_order("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated_unchanged() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.fail_next_get(StoreError::Timeout {
            operation: "get_order",
            timeout: Duration::from_secs(5),
        });
        let (service, cache) = service_with(repo);

        let result = service.get_order("o1").await;

        assert!(matches!(
            result,
            Err(OrderServiceError::Store(StoreError::Timeout { operation: "get_order", .. }))
        ));
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn test_cache_failures_never_fail_requests() {
        let repo = Arc::new(InMemoryOrderRepository::with_orders([minimal_order("o1")]));
        let cache = Arc::new(BrokenCache::default());
        let service = OrderService::new(cache.clone(), repo.clone());

        assert!(service.get_order("o1").await.is_ok());
        assert!(service.save_order(&minimal_order("o2")).await.is_ok());

        assert_eq!(cache.sets.load(Ordering::SeqCst), 2);
        assert!(repo.stored("o2").is_some());
    }

    #[tokio::test]
    async fn test_save_order_persists_then_caches() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let (service, cache) = service_with(repo.clone());
        let order = sample_order("o1");

        service.save_order(&order).await.unwrap();

        assert_eq!(repo.stored("o1"), Some(order.clone()));
        assert_eq!(cache.get("o1").unwrap(), Some(order));
    }

    #[tokio::test]
    async fn test_save_without_uid_touches_nothing() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let (service, cache) = service_with(repo.clone());

        let result = service.save_order(&minimal_order("")).await;

        assert!(matches!(result, Err(OrderServiceError::MissingOrderUid)));
        assert_eq!(repo.save_calls(), 0);
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_save_is_conflict_and_keeps_original() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let (service, cache) = service_with(repo.clone());
        let original = minimal_order("o1");
        service.save_order(&original).await.unwrap();

        let mut changed = minimal_order("o1");
        changed.payment.transaction = "other".to_string();
        changed.track_number = "CHANGED".to_string();
        let result = service.save_order(&changed).await;

        assert!(matches!(result, Err(OrderServiceError::Conflict(ref uid)) if uid == "o1"));
        assert_eq!(repo.stored("o1"), Some(original.clone()));
        assert_eq!(cache.get("o1").unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_failed_save_does_not_cache() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.fail_next_save(StoreError::Database(sqlx::Error::PoolTimedOut));
        let (service, cache) = service_with(repo);

        let result = service.save_order(&minimal_order("o1")).await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn test_warm_cache_loads_everything_stored() {
        let repo = Arc::new(InMemoryOrderRepository::with_orders([
            minimal_order("o1"),
            minimal_order("o2"),
            minimal_order("o3"),
        ]));
        let (service, cache) = service_with(repo);

        let loaded = service.warm_cache().await.unwrap();

        assert_eq!(loaded, 3);
        assert_eq!(cache.count(), 3);
        assert_eq!(service.cached_orders(), 3);
    }

    #[tokio::test]
    async fn test_warm_cache_tolerates_broken_cache() {
        let repo = Arc::new(InMemoryOrderRepository::with_orders([minimal_order("o1")]));
        let service = OrderService::new(Arc::new(BrokenCache::default()), repo);

        assert_eq!(service.warm_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_metrics_are_recorded() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let repo = Arc::new(InMemoryOrderRepository::with_orders([minimal_order("o1")]));
        let cache = Arc::new(TtlCache::new(Duration::ZERO));
        let service = OrderService::new(cache, repo).with_metrics(metrics.clone());

        service.get_order("o1").await.unwrap();
        service.get_order("o1").await.unwrap();

        assert_eq!(metrics.cache_lookups_total.with_label_values(&[lookup::MISS]).get(), 1);
        assert_eq!(metrics.cache_lookups_total.with_label_values(&[lookup::HIT]).get(), 1);
    }
}
