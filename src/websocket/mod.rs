//! WebSocket transport: connection handling and the HTTP surface.

pub mod connection;
pub mod routes;

use std::sync::Arc;

use crate::broadcast::LocalFanout;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::metrics::EngineMetrics;
use crate::rate_limit::RateLimiter;
use crate::security_log::SecurityLog;

pub use routes::create_router;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub fanout: Arc<LocalFanout>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<EngineMetrics>,
    pub security: Arc<SecurityLog>,
}
