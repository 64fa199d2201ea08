use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use folio_order::{Verification, WebhookOutcome};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub order_number: Option<String>,
}

/// POST /v1/webhooks/razorpay
/// The raw body is what the gateway signed, so it is taken as bytes and only parsed
/// after the signature checks out.
pub async fn handle_razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::AuthenticationError("Missing webhook signature".to_string()))?;

    let outcome = state.verifier.handle_webhook(&body, signature).await?;

    let ack = match outcome {
        WebhookOutcome::Payment(Verification::Confirmed(order)) => {
            tracing::info!("Order {} marked as PAID via webhook", order.order_number);
            WebhookAck { status: "processed", order_number: Some(order.order_number) }
        }
        WebhookOutcome::Payment(Verification::AlreadyConfirmed(order)) => {
            WebhookAck { status: "duplicate", order_number: Some(order.order_number) }
        }
        WebhookOutcome::MarkedFailed(order) => {
            tracing::info!("Order {} marked as FAILED via webhook", order.order_number);
            WebhookAck { status: "processed", order_number: Some(order.order_number) }
        }
        WebhookOutcome::CapturedAfterFailure(order) => {
            WebhookAck { status: "refund_required", order_number: Some(order.order_number) }
        }
        WebhookOutcome::Ignored(reason) => {
            tracing::debug!("Webhook ignored: {}", reason);
            WebhookAck { status: "ignored", order_number: None }
        }
    };

    Ok(Json(ack))
}
