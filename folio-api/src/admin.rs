use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use folio_core::order::{Order, OrderStatus, PaymentStatus};
use folio_core::repository::{OrderFilter, OrderPage, OrderSort, Pagination};
use folio_order::OrderDetails;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub email: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: OrderSort,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListOrdersQuery {
    fn pagination(&self) -> Pagination {
        let defaults = Pagination::default();
        Pagination::new(
            self.page.unwrap_or(defaults.page),
            self.per_page.unwrap_or(defaults.per_page),
        )
    }

    fn into_filter(self) -> Result<OrderFilter, AppError> {
        if let (Some(from), Some(to)) = (self.created_from, self.created_to) {
            if from > to {
                return Err(AppError::ValidationError(
                    "created_from must not be after created_to".to_string(),
                ));
            }
        }
        let page = self.pagination();
        Ok(OrderFilter {
            status: self.status,
            payment_status: self.payment_status,
            email_contains: self.email.map(|e| e.trim().to_ascii_lowercase()).filter(|e| !e.is_empty()),
            created_from: self.created_from,
            created_to: self.created_to,
            sort: self.sort,
            page,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl OrderListResponse {
    fn new(page: OrderPage, pagination: Pagination) -> Self {
        Self {
            orders: page.orders,
            total: page.total,
            page: pagination.page,
            per_page: pagination.per_page,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectOrderBody {
    pub reason: String,
}

fn admin_id(claims: &AdminClaims) -> Result<i64, AppError> {
    claims
        .admin_id()
        .ok_or_else(|| AppError::AuthorizationError("Token subject is not an admin id".to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /v1/admin/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, AppError> {
    let filter = query.into_filter()?;
    let page = state.approvals.list(&filter).await?;
    Ok(Json(OrderListResponse::new(page, filter.page)))
}

/// GET /v1/admin/orders/pending
/// Paid orders waiting for review, oldest payment first
pub async fn pending_orders(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<OrderListResponse>, AppError> {
    let defaults = Pagination::default();
    let pagination = Pagination::new(
        query.page.unwrap_or(defaults.page),
        query.per_page.unwrap_or(defaults.per_page),
    );
    let page = state.approvals.awaiting_approval(pagination).await?;
    Ok(Json(OrderListResponse::new(page, pagination)))
}

/// GET /v1/admin/orders/{id}
pub async fn order_details(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderDetails>, AppError> {
    Ok(Json(state.approvals.details(order_id).await?))
}

/// POST /v1/admin/orders/{id}/approve
pub async fn approve_order(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(order_id): Path<i64>,
) -> Result<Json<Order>, AppError> {
    let order = state.approvals.approve(order_id, admin_id(&claims)?).await?;
    Ok(Json(order))
}

/// POST /v1/admin/orders/{id}/reject
pub async fn reject_order(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(order_id): Path<i64>,
    Json(body): Json<RejectOrderBody>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .approvals
        .reject(order_id, admin_id(&claims)?, &body.reason)
        .await?;
    Ok(Json(order))
}
