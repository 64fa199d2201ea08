use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use folio_catalog::CurrencyError;
use folio_core::StoreError;
use folio_order::OrderError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Order(err) => order_parts(err),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                internal()
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                internal()
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal Server Error".to_string(),
    )
}

fn order_parts(err: &OrderError) -> (StatusCode, &'static str, String) {
    match err {
        OrderError::Validation(_)
        | OrderError::NoTemplatesFound
        | OrderError::InvalidTemplates(_)
        | OrderError::TemplateInactive(_) => (StatusCode::BAD_REQUEST, "validation_error", err.to_string()),
        OrderError::Currency(CurrencyError::Unavailable(detail)) => {
            tracing::error!("Exchange rates unavailable: {}", detail);
            (StatusCode::BAD_GATEWAY, "currency_unavailable", "Exchange rates unavailable".to_string())
        }
        OrderError::Currency(_) => (StatusCode::BAD_REQUEST, "validation_error", err.to_string()),
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        OrderError::InvalidStatus { .. } => (StatusCode::CONFLICT, "invalid_status", err.to_string()),
        OrderError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature", err.to_string()),
        OrderError::OrderNotApproved => (StatusCode::FORBIDDEN, "order_not_approved", err.to_string()),
        OrderError::DownloadLimitExceeded => (StatusCode::FORBIDDEN, "download_limit_exceeded", err.to_string()),
        OrderError::LinkExpired => (StatusCode::GONE, "link_expired", err.to_string()),
        OrderError::Gateway(detail) => {
            tracing::error!("Payment gateway failure: {}", detail);
            (StatusCode::BAD_GATEWAY, "gateway_error", "Payment gateway unavailable".to_string())
        }
        OrderError::Store(StoreError::Duplicate(_)) => (StatusCode::CONFLICT, "conflict", err.to_string()),
        OrderError::Store(detail) => {
            tracing::error!("Store failure: {}", detail);
            internal()
        }
        OrderError::Catalog(detail) => {
            tracing::error!("Catalog failure: {}", detail);
            internal()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = self.parts();

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
