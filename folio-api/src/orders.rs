use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use folio_core::order::{Order, OrderItem, PaymentStatus};
use folio_order::{
    CreateOrderRequest, CustomerDetails, DownloadCredential, DownloadRequest, Verification,
};
use folio_shared::pii::Masked;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::ClientMeta;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub template_ids: Vec<i64>,
    /// Display currency, e.g. "USD".
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub template_id: i64,
    pub title: String,
    pub slug: String,
    pub price_minor: i64,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            template_id: item.template_id,
            title: item.template_title.clone(),
            slug: item.template_slug.clone(),
            price_minor: item.price_minor,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub key_id: String,
    pub intent_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_number: String,
    pub status: String,
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub total_minor: i64,
    pub currency: String,
    pub display_currency: String,
    pub total_converted_minor: i64,
    pub items: Vec<OrderItemResponse>,
    pub payment: PaymentIntentResponse,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentBody {
    pub intent_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyPaymentResponse {
    pub order_number: String,
    pub status: String,
    pub payment_status: PaymentStatus,
    /// True when an earlier confirmation had already recorded this payment.
    pub already_confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub order_number: String,
    pub email: String,
}

/// Customer view: coarse status only, no gateway or audit fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_number: String,
    pub status: String,
    pub customer_name: String,
    pub customer_email: Masked<String>,
    pub total_minor: i64,
    pub currency: String,
    pub display_currency: String,
    pub total_converted_minor: i64,
    pub items: Vec<OrderItemResponse>,
    pub rejection_reason: Option<String>,
    pub download_count: i32,
    pub max_downloads: i32,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    fn new(order: Order, items: &[OrderItem]) -> Self {
        Self {
            status: order.status.customer_label().to_string(),
            order_number: order.order_number,
            customer_name: order.customer_name,
            customer_email: Masked(order.customer_email),
            total_minor: order.total_minor,
            currency: order.base_currency,
            display_currency: order.currency_code,
            total_converted_minor: order.total_converted_minor,
            items: items.iter().map(OrderItemResponse::from).collect(),
            rejection_reason: order.rejection_reason,
            download_count: order.download_count,
            max_downloads: order.max_downloads,
            download_expires_at: order.download_expires_at,
            created_at: order.created_at,
            paid_at: order.paid_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub token: Option<String>,
    pub order_number: Option<String>,
    pub email: Option<String>,
    pub template_id: Option<i64>,
}

impl DownloadQuery {
    fn credential(self) -> Result<(DownloadCredential, Option<i64>), AppError> {
        let credential = match (self.token, self.order_number, self.email) {
            (Some(token), _, _) if !token.trim().is_empty() => DownloadCredential::Token(token),
            (_, Some(order_number), Some(email)) => DownloadCredential::OrderAndEmail { order_number, email },
            _ => {
                return Err(AppError::ValidationError(
                    "token or order_number and email are required".to_string(),
                ))
            }
        };
        Ok((credential, self.template_id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadFile {
    pub template_id: i64,
    pub title: String,
    pub file_ref: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub order_number: String,
    pub remaining_downloads: i32,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub files: Vec<DownloadFile>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
/// Price the selection, persist a pending order and open its payment intent
pub async fn create_order(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    let created = state
        .orders
        .create_order(CreateOrderRequest {
            customer: CustomerDetails {
                email: body.email,
                name: body.name,
                phone: body.phone,
            },
            template_ids: body.template_ids,
            currency: body.currency,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        })
        .await?;

    let order = created.order;
    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            status: order.status.customer_label().to_string(),
            order_number: order.order_number,
            subtotal_minor: order.subtotal_minor,
            discount_minor: order.discount_minor,
            tax_minor: order.tax_minor,
            total_minor: order.total_minor,
            currency: order.base_currency,
            display_currency: order.currency_code,
            total_converted_minor: order.total_converted_minor,
            items: created.items.iter().map(OrderItemResponse::from).collect(),
            payment: PaymentIntentResponse {
                key_id: created.key_id,
                intent_id: created.intent.id,
                amount_minor: created.intent.amount_minor,
                currency: created.intent.currency,
            },
        }),
    ))
}

/// POST /v1/orders/verify
/// Client-side payment confirmation
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(body): Json<VerifyPaymentBody>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let verification = state
        .verifier
        .verify_client(&body.intent_id, &body.payment_id, &body.signature)
        .await?;

    let already_confirmed = matches!(verification, Verification::AlreadyConfirmed(_));
    let order = verification.order();
    Ok(Json(VerifyPaymentResponse {
        order_number: order.order_number.clone(),
        status: order.status.customer_label().to_string(),
        payment_status: order.payment_status,
        already_confirmed,
    }))
}

/// GET /v1/orders/lookup?order_number=..&email=..
pub async fn lookup_order(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<OrderResponse>, AppError> {
    let (order, items) = state.orders.find_order(&query.order_number, &query.email).await?;
    Ok(Json(OrderResponse::new(order, &items)))
}

/// GET /v1/orders/download?token=.. or ?order_number=..&email=..
/// Counts one download and returns the files it covers
pub async fn download(
    State(state): State<AppState>,
    client: ClientMeta,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<DownloadResponse>, AppError> {
    let (credential, template_id) = query.credential()?;

    let grant = state
        .downloads
        .authorize(DownloadRequest {
            credential,
            template_id,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        })
        .await?;

    Ok(Json(DownloadResponse {
        order_number: grant.order.order_number,
        remaining_downloads: grant.remaining,
        download_expires_at: grant.order.download_expires_at,
        files: grant
            .items
            .into_iter()
            .map(|item| DownloadFile {
                template_id: item.template_id,
                title: item.template_title,
                file_ref: item.template_file_ref,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_takes_precedence_over_order_and_email() {
        let query = DownloadQuery {
            token: Some("tok".into()),
            order_number: Some("ORD-1".into()),
            email: Some("a@b.c".into()),
            template_id: Some(4),
        };
        let (credential, template_id) = query.credential().unwrap();
        assert!(matches!(credential, DownloadCredential::Token(t) if t == "tok"));
        assert_eq!(template_id, Some(4));
    }

    #[test]
    fn download_requires_a_credential() {
        let query = DownloadQuery { token: Some("  ".into()), order_number: Some("ORD-1".into()), email: None, template_id: None };
        assert!(matches!(query.credential(), Err(AppError::ValidationError(_))));
    }
}
