use crate::error::OrderError;
use crate::notify::deliver;
use crate::policy::OrderPolicy;
use chrono::Utc;
use folio_core::notification::{ApprovalNotice, Notifier};
use folio_core::order::{DownloadLog, Order, OrderItem, OrderStatus, StatusChange};
use folio_core::repository::{OrderFilter, OrderPage, OrderRepository, Pagination};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Full admin view of one order
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub history: Vec<StatusChange>,
    pub downloads: Vec<DownloadLog>,
}

/// Admin review of paid orders.
pub struct ApprovalWorkflow {
    store: Arc<dyn OrderRepository>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<OrderPolicy>,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn OrderRepository>, notifier: Arc<dyn Notifier>, policy: Arc<OrderPolicy>) -> Self {
        Self { store, notifier, policy }
    }

    /// paid -> approved, then send the download link.
    pub async fn approve(&self, order_id: i64, admin_id: i64) -> Result<Order, OrderError> {
        let now = Utc::now();
        let expires_at = now + self.policy.link_ttl;

        let Some(order) = self.store.approve(order_id, admin_id, expires_at, now).await? else {
            return Err(self.refused(order_id, OrderStatus::Approved).await);
        };
        info!("Order {} approved by admin {}", order.order_number, admin_id);

        let notice = ApprovalNotice {
            download_link: self.policy.download_link(&order.download_token),
            max_downloads: order.max_downloads,
            expires_at: order.download_expires_at,
        };
        deliver(
            "Approval",
            &order.order_number,
            &order.customer_email,
            self.policy.notify_timeout,
            self.notifier.send_approval(&order, &notice),
        )
        .await;

        Ok(order)
    }

    /// paid -> rejected with a mandatory reason.
    pub async fn reject(&self, order_id: i64, admin_id: i64, reason: &str) -> Result<Order, OrderError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OrderError::Validation("a rejection reason is required".to_string()));
        }

        let Some(order) = self.store.reject(order_id, admin_id, reason, Utc::now()).await? else {
            return Err(self.refused(order_id, OrderStatus::Rejected).await);
        };
        info!("Order {} rejected by admin {}: {}", order.order_number, admin_id, reason);

        deliver(
            "Rejection",
            &order.order_number,
            &order.customer_email,
            self.policy.notify_timeout,
            self.notifier.send_rejection(&order, reason),
        )
        .await;

        Ok(order)
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, OrderError> {
        Ok(self.store.list_orders(filter).await?)
    }

    /// Paid orders waiting for review, oldest payment first.
    pub async fn awaiting_approval(&self, page: Pagination) -> Result<OrderPage, OrderError> {
        Ok(self.store.list_awaiting_approval(page).await?)
    }

    pub async fn details(&self, order_id: i64) -> Result<OrderDetails, OrderError> {
        let order = self
            .store
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
        let items = self.store.items_for(order_id).await?;
        let history = self.store.status_history(order_id).await?;
        let downloads = self.store.download_logs(order_id).await?;
        Ok(OrderDetails { order, items, history, downloads })
    }

    /// Explain why a guarded review update did not apply.
    async fn refused(&self, order_id: i64, attempted: OrderStatus) -> OrderError {
        match self.store.find_by_id(order_id).await {
            Ok(Some(order)) => {
                warn!(
                    "Refused to move order {} from {} to {}",
                    order.order_number, order.status, attempted
                );
                OrderError::InvalidStatus { current: order.status, attempted }
            }
            Ok(None) => OrderError::NotFound(order_id.to_string()),
            Err(e) => e.into(),
        }
    }
}
