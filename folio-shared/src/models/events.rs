use serde::{Deserialize, Serialize};

/// Transactional email requests, published for the mailer to render and deliver.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    OrderConfirmation(OrderConfirmationEvent),
    OrderApproved(OrderApprovedEvent),
    OrderRejected(OrderRejectedEvent),
}

impl NotificationEvent {
    pub fn order_number(&self) -> &str {
        match self {
            NotificationEvent::OrderConfirmation(e) => &e.order_number,
            NotificationEvent::OrderApproved(e) => &e.order_number,
            NotificationEvent::OrderRejected(e) => &e.order_number,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::OrderConfirmation(_) => "ORDER_CONFIRMATION",
            NotificationEvent::OrderApproved(_) => "ORDER_APPROVED",
            NotificationEvent::OrderRejected(_) => "ORDER_REJECTED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LineItemSummary {
    pub title: String,
    pub price_minor: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderConfirmationEvent {
    pub order_number: String,
    pub recipient: Recipient,
    pub items: Vec<LineItemSummary>,
    pub total_minor: i64,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderApprovedEvent {
    pub order_number: String,
    pub recipient: Recipient,
    pub download_link: String,
    pub max_downloads: i32,
    pub link_expires_at: Option<i64>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderRejectedEvent {
    pub order_number: String,
    pub recipient: Recipient,
    pub reason: String,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_kind() {
        let event = NotificationEvent::OrderRejected(OrderRejectedEvent {
            order_number: "ORD-1".into(),
            recipient: Recipient { email: "a@b.co".into(), name: "A".into() },
            reason: "duplicate purchase".into(),
            timestamp: 0,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ORDER_REJECTED");
        assert_eq!(json["reason"], "duplicate purchase");
        assert_eq!(event.order_number(), "ORD-1");
        assert_eq!(event.kind(), "ORDER_REJECTED");
    }
}
