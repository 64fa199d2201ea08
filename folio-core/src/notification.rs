use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_shared::models::events::{
    LineItemSummary, NotificationEvent, OrderApprovedEvent, OrderConfirmationEvent,
    OrderRejectedEvent, Recipient,
};

use crate::order::{Order, OrderItem};

/// What the customer needs to fetch their purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalNotice {
    pub download_link: String,
    pub max_downloads: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification not accepted within {0:?}")]
    Timeout(std::time::Duration),
}

/// Transactional email collaborator.
///
/// Called only after the state change it reports has been committed. Callers log
/// failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(&self, order: &Order, items: &[OrderItem]) -> Result<(), NotifyError>;

    async fn send_approval(&self, order: &Order, notice: &ApprovalNotice) -> Result<(), NotifyError>;

    async fn send_rejection(&self, order: &Order, reason: &str) -> Result<(), NotifyError>;
}

fn recipient(order: &Order) -> Recipient {
    Recipient {
        email: order.customer_email.clone(),
        name: order.customer_name.clone(),
    }
}

pub fn confirmation_event(order: &Order, items: &[OrderItem], now: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent::OrderConfirmation(OrderConfirmationEvent {
        order_number: order.order_number.clone(),
        recipient: recipient(order),
        items: items
            .iter()
            .map(|item| LineItemSummary {
                title: item.template_title.clone(),
                price_minor: item.price_minor,
            })
            .collect(),
        total_minor: order.total_minor,
        currency: order.base_currency.clone(),
        timestamp: now.timestamp(),
    })
}

pub fn approval_event(order: &Order, notice: &ApprovalNotice, now: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent::OrderApproved(OrderApprovedEvent {
        order_number: order.order_number.clone(),
        recipient: recipient(order),
        download_link: notice.download_link.clone(),
        max_downloads: notice.max_downloads,
        link_expires_at: notice.expires_at.map(|at| at.timestamp()),
        timestamp: now.timestamp(),
    })
}

pub fn rejection_event(order: &Order, reason: &str, now: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent::OrderRejected(OrderRejectedEvent {
        order_number: order.order_number.clone(),
        recipient: recipient(order),
        reason: reason.to_string(),
        timestamp: now.timestamp(),
    })
}
