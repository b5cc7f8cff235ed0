use shuttle_order::{BookingOrchestrator, CreditLedger, EngineMetrics};
use shuttle_store::app_config::RateLimitConfig;
use shuttle_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BookingOrchestrator>,
    pub ledger: Arc<CreditLedger>,
    pub metrics: Arc<EngineMetrics>,
    /// Rate limiting is skipped without Redis.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    /// Display conversion for purchase screens.
    pub rand_per_credit: i64,
}
