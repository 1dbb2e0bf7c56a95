// ============================================================================
// HTTP Transport
// ============================================================================
//
// GET  /order?uid=<id>  -> 200 order | 400 | 404 | 500
// POST /order           -> 201 order | 400 | 409 | 500
// GET  /healthz         -> 200
// GET  /ready           -> 200 | 503
// GET  /metrics         -> Prometheus text format
//
// ============================================================================

mod handlers;
mod server;

use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::service::OrderService;

pub use handlers::configure;
pub use server::build_server;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub metrics: Arc<Metrics>,
    pub save_timeout: Duration,
    pub ready_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<OrderService>, metrics: Arc<Metrics>) -> Self {
        Self {
            service,
            metrics,
            save_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(3),
        }
    }
}
