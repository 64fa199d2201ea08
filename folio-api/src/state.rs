use std::sync::Arc;
use folio_order::{ApprovalWorkflow, DownloadAuthorizer, OrderManager, PaymentVerifier};
use folio_store::RedisClient;
use crate::middleware::resiliency::ResiliencyState;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone, Copy)]
pub struct RateLimitSettings {
    pub requests: i64,
    pub window_seconds: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub verifier: Arc<PaymentVerifier>,
    pub approvals: Arc<ApprovalWorkflow>,
    pub downloads: Arc<DownloadAuthorizer>,
    /// `None` disables rate limiting (local runs and tests).
    pub rate_limiter: Option<Arc<RedisClient>>,
    pub rate_limit: RateLimitSettings,
    pub auth: AuthConfig,
    pub resiliency: Arc<ResiliencyState>,
    pub allowed_origins: Vec<String>,
    /// Honor `X-Forwarded-For`; otherwise the socket peer is the client.
    pub trust_forwarded_for: bool,
}
