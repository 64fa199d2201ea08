use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use folio_store::redis_repo::rate_limit_key;
use serde_json::json;

use crate::middleware::client::client_ip;
use crate::state::AppState;

/// Per-IP window over the public order routes. Fails open when Redis is unreachable.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(req).await;
    };

    let ip = client_ip(req.headers(), req.extensions(), state.trust_forwarded_for)
        .unwrap_or_else(|| "unknown".to_string());
    let key = rate_limit_key("orders", &ip);

    match limiter
        .check_rate_limit(&key, state.rate_limit.requests, state.rate_limit.window_seconds)
        .await
    {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!("Rate limit exceeded for {}", ip);
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Rate limit exceeded", "code": "rate_limited" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Rate limiter unavailable, allowing request: {}", e);
            next.run(req).await
        }
    }
}
