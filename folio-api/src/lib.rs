use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod error;
pub mod middleware;
pub mod orders;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .merge(public_routes(state.clone()))
        .route("/v1/webhooks/razorpay", post(webhooks::handle_razorpay_webhook))
        .merge(admin_routes(state.clone()))
        .route("/health", get(|| async { "ok" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn public_routes(state: AppState) -> Router<AppState> {
    // only creation talks to the gateway
    let create = Router::new()
        .route("/v1/orders", post(orders::create_order))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::circuit_breaker_middleware,
        ));

    Router::new()
        .merge(create)
        .route("/v1/orders/verify", post(orders::verify_payment))
        .route("/v1/orders/lookup", get(orders::lookup_order))
        .route("/v1/orders/download", get(orders::download))
        .route_layer(axum::middleware::from_fn_with_state(state, middleware::rate_limit_middleware))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/orders", get(admin::list_orders))
        .route("/v1/admin/orders/pending", get(admin::pending_orders))
        .route("/v1/admin/orders/{id}", get(admin::order_details))
        .route("/v1/admin/orders/{id}/approve", post(admin::approve_order))
        .route("/v1/admin/orders/{id}/reject", post(admin::reject_order))
        .route_layer(axum::middleware::from_fn_with_state(state, middleware::admin_auth_middleware))
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.is_empty() {
        return AllowOrigin::any();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    AllowOrigin::list(parsed)
}
