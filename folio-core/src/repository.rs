use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::order::{
    DownloadLog, NewDownloadLog, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus,
    PaymentConfirmation, PaymentStatus, StatusChange,
};
use crate::StoreResult;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    /// Clamp to page >= 1 and 1..=MAX_PAGE_SIZE rows.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderSort {
    #[default]
    Newest,
    Oldest,
    AmountHigh,
    AmountLow,
}

/// The closed set of admin listing filters
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub email_contains: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sort: OrderSort,
    pub page: Pagination,
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: i64,
}

/// Persistence contract for orders.
///
/// Every method that changes `status` is a compare-and-swap against the persisted row:
/// it applies only when the guard named in its doc holds at write time, records a
/// [`StatusChange`] in the same unit of work, and returns the updated order. `Ok(None)`
/// means the guard did not hold (or the order does not exist) and nothing was written.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the header and all items as one unit. Fails with
    /// `StoreError::Duplicate` if the order number or download token is taken.
    async fn create_order(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> StoreResult<(Order, Vec<OrderItem>)>;

    /// Guard: status = pending and no intent attached yet.
    async fn attach_intent(&self, order_id: i64, intent_id: &str) -> StoreResult<Option<Order>>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Order>>;

    async fn find_by_intent_id(&self, intent_id: &str) -> StoreResult<Option<Order>>;

    async fn find_by_number_and_email(
        &self,
        order_number: &str,
        email: &str,
    ) -> StoreResult<Option<Order>>;

    async fn find_by_download_token(&self, token: &str) -> StoreResult<Option<Order>>;

    async fn items_for(&self, order_id: i64) -> StoreResult<Vec<OrderItem>>;

    /// Guard: status = pending. Sets payment facts, `paid`/`success`, paid_at.
    async fn mark_paid(
        &self,
        order_id: i64,
        payment: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    /// Guard: status = pending. Sets `failed`/`failed`.
    async fn mark_failed(
        &self,
        order_id: i64,
        note: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    /// Guard: status = failed and no payment recorded. Stores the payment facts of a
    /// capture that arrived after the order failed and notes it in the history for refund
    /// reconciliation. The status stays `failed`.
    async fn record_late_payment(
        &self,
        order_id: i64,
        payment: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    /// Guard: status = paid. Stamps reviewer and link expiry.
    async fn approve(
        &self,
        order_id: i64,
        admin_id: i64,
        link_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    /// Guard: status = paid. Stamps reviewer and reason.
    async fn reject(
        &self,
        order_id: i64,
        admin_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    /// Guard: status in (approved, completed), link not expired at `now`,
    /// download_count < max_downloads. Increments the count in the same statement, moves
    /// approved to completed on the first download and appends `log`. Nothing is logged
    /// when the guard fails.
    async fn record_download(
        &self,
        order_id: i64,
        log: &NewDownloadLog,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    async fn append_download_log(&self, log: &NewDownloadLog) -> StoreResult<DownloadLog>;

    async fn download_logs(&self, order_id: i64) -> StoreResult<Vec<DownloadLog>>;

    async fn status_history(&self, order_id: i64) -> StoreResult<Vec<StatusChange>>;

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage>;

    /// Paid orders oldest-payment first.
    async fn list_awaiting_approval(&self, page: Pagination) -> StoreResult<OrderPage>;

    /// Fail every pending order created before `created_before` that never got a gateway
    /// intent. Orders with an intent may still be captured, so only the gateway's
    /// `payment.failed` or a bad client signature fails them. Same guard as
    /// [`OrderRepository::mark_failed`], applied per row.
    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Order>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let page = Pagination::new(0, 500);
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = Pagination::new(3, 20);
        assert_eq!(page.offset(), 40);
        assert_eq!(page.limit(), 20);
    }

    #[test]
    fn sort_parses_from_snake_case() {
        let sort: OrderSort = serde_json::from_str("\"amount_high\"").unwrap();
        assert_eq!(sort, OrderSort::AmountHigh);
        assert!(serde_json::from_str::<OrderSort>("\"cheapest\"").is_err());
    }
}
