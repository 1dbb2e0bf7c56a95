use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{CacheError, OrderCache};
use crate::domain::order::Order;

// ============================================================================
// TTL Cache
// ============================================================================
//
// State: `order_uid -> Entry` behind a single RwLock. Reads take the shared
// lock, every mutation takes the exclusive lock. The lock is never held
// across an await point.
//
// Expiry is checked lazily on every read, so visibility does not depend on
// whether the sweeper has run yet. The sweeper only reclaims memory.
//
// ============================================================================

/// Floor for the sweep period when the TTL is too small to halve usefully
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Entry {
    order: Order,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

type Entries = HashMap<String, Entry>;

struct Sweeper {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TtlCache {
    entries: Arc<RwLock<Entries>>,
    ttl: Option<Duration>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl TtlCache {
    /// Create a cache. A zero `ttl` disables expiry entirely.
    ///
    /// With a positive `ttl` a sweep task is spawned on the current Tokio
    /// runtime. Outside a runtime the cache still expires entries lazily but
    /// never reclaims their memory until they are overwritten or deleted.
    pub fn new(ttl: Duration) -> Self {
        let ttl = (!ttl.is_zero()).then_some(ttl);
        let entries = Arc::new(RwLock::new(HashMap::new()));

        let sweeper = ttl.and_then(|ttl| {
            let runtime = match tokio::runtime::Handle::try_current() {
                Ok(runtime) => runtime,
                Err(_) => {
                    tracing::warn!(
                        ttl_ms = ttl.as_millis() as u64,
                        "No Tokio runtime, cache sweeper not started"
                    );
                    return None;
                }
            };

            let interval = sweep_interval(ttl);
            let stop = CancellationToken::new();
            let handle = runtime.spawn(run_sweeper(
                Arc::downgrade(&entries),
                interval,
                stop.clone(),
            ));

            tracing::debug!(
                ttl_ms = ttl.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Cache sweeper started"
            );

            Some(Sweeper { stop, handle })
        });

        Self {
            entries,
            ttl,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge_expired(&self.entries, Instant::now())
    }

    /// Stop the sweep task and wait for it to exit.
    ///
    /// Safe to call any number of times.
    pub async fn shutdown(&self) {
        let sweeper = self.take_sweeper();

        if let Some(Sweeper { stop, handle }) = sweeper {
            stop.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Cache sweeper ended abnormally");
            }
            tracing::debug!("Cache sweeper stopped");
        }
    }

    fn take_sweeper(&self) -> Option<Sweeper> {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn expiry_from(&self, now: Instant) -> Option<Instant> {
        self.ttl.map(|ttl| now + ttl)
    }
}

impl Drop for TtlCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.take_sweeper() {
            sweeper.stop.cancel();
        }
    }
}

impl OrderCache for TtlCache {
    fn set(&self, order: &Order) -> Result<(), CacheError> {
        if order.order_uid.is_empty() {
            return Err(CacheError::MissingKey);
        }

        let entry = Entry {
            order: order.clone(),
            expires_at: self.expiry_from(Instant::now()),
        };

        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(order.order_uid.clone(), entry);
        Ok(())
    }

    fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        let now = Instant::now();

        Ok(entries
            .get(order_uid)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.order.clone()))
    }

    fn get_all(&self) -> Result<HashMap<String, Order>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        let now = Instant::now();

        Ok(entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(uid, entry)| (uid.clone(), entry.order.clone()))
            .collect())
    }

    fn delete(&self, order_uid: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(order_uid);
    }

    fn count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    fn bulk_load(&self, orders: &[Order]) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        let expires_at = self.expiry_from(Instant::now());
        let mut loaded = 0;

        for order in orders {
            if order.order_uid.is_empty() {
                tracing::warn!("Skipping order without order_uid during cache load");
                continue;
            }
            entries.insert(
                order.order_uid.clone(),
                Entry {
                    order: order.clone(),
                    expires_at,
                },
            );
            loaded += 1;
        }

        Ok(loaded)
    }
}

fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 2).max(MIN_SWEEP_INTERVAL)
}

fn purge_expired(entries: &RwLock<Entries>, now: Instant) -> usize {
    let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

async fn run_sweeper(entries: Weak<RwLock<Entries>>, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let removed = purge_expired(&entries, Instant::now());
                if removed > 0 {
                    tracing::debug!(removed = removed, "Swept expired cache entries");
                }
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
