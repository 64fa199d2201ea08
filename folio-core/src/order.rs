use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

/// Order status in the lifecycle.
///
/// ```text
/// pending -> paid -> approved -> completed
///                 \-> rejected
/// pending -> failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Approved,
    Completed,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Approved => "approved",
            OrderStatus::Completed => "completed",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "approved" => Some(OrderStatus::Approved),
            "completed" => Some(OrderStatus::Completed),
            "rejected" => Some(OrderStatus::Rejected),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    /// Edges of the state machine. The in-memory store and the payment verifier guard on
    /// this; the Postgres updates spell the same edges out in their `WHERE` clauses.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Failed)
                | (OrderStatus::Paid, OrderStatus::Approved)
                | (OrderStatus::Paid, OrderStatus::Rejected)
                | (OrderStatus::Approved, OrderStatus::Completed)
        )
    }

    /// Payment has been confirmed at some point (paid or any state after it).
    pub fn is_payment_confirmed(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Approved | OrderStatus::Completed | OrderStatus::Rejected
        )
    }

    /// Coarse label shown to customers.
    pub fn customer_label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "awaiting_payment",
            OrderStatus::Paid => "awaiting_approval",
            OrderStatus::Approved => "download_ready",
            OrderStatus::Completed => "downloaded",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Failed => "payment_failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Reason a download attempt is refused, in the order the checks apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadDenial {
    NotApproved,
    LinkExpired,
    LimitExceeded,
}

impl DownloadDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadDenial::NotApproved => "order_not_approved",
            DownloadDenial::LinkExpired => "link_expired",
            DownloadDenial::LimitExceeded => "download_limit_exceeded",
        }
    }
}

/// The persisted purchase record. Never deleted.
///
/// `status` is the source of truth; `reviewed_by`/`reviewed_at` only record who moved a
/// paid order to approved or rejected, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub total_minor: i64,
    pub base_currency: String,
    pub currency_code: String,
    pub exchange_rate_micros: i64,
    pub total_converted_minor: i64,
    pub payment_method: String,
    pub gateway_intent_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub gateway_signature: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing, default)]
    pub download_token: String,
    pub download_count: i32,
    pub max_downloads: i32,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Why a download would be refused right now, if it would.
    pub fn download_denial(&self, now: DateTime<Utc>) -> Option<DownloadDenial> {
        if !matches!(self.status, OrderStatus::Approved | OrderStatus::Completed) {
            return Some(DownloadDenial::NotApproved);
        }
        if let Some(expires_at) = self.download_expires_at {
            if expires_at <= now {
                return Some(DownloadDenial::LinkExpired);
            }
        }
        if self.download_count >= self.max_downloads {
            return Some(DownloadDenial::LimitExceeded);
        }
        None
    }

    pub fn remaining_downloads(&self) -> i32 {
        (self.max_downloads - self.download_count).max(0)
    }
}

/// Everything the store needs to insert an order header.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub total_minor: i64,
    pub base_currency: String,
    pub currency_code: String,
    pub exchange_rate_micros: i64,
    pub total_converted_minor: i64,
    pub payment_method: String,
    pub download_token: String,
    pub max_downloads: i32,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Snapshot of a template at purchase time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub template_id: i64,
    pub template_title: String,
    pub template_slug: String,
    pub template_file_ref: String,
    pub price_minor: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub template_id: i64,
    pub template_title: String,
    pub template_slug: String,
    pub template_file_ref: String,
    pub price_minor: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadOutcome {
    Success,
    Denied,
}

impl DownloadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadOutcome::Success => "success",
            DownloadOutcome::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(DownloadOutcome::Success),
            "denied" => Some(DownloadOutcome::Denied),
            _ => None,
        }
    }
}

/// Append-only audit of a download attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadLog {
    pub id: i64,
    pub order_id: i64,
    pub template_id: Option<i64>,
    pub outcome: DownloadOutcome,
    pub reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDownloadLog {
    pub order_id: i64,
    pub template_id: Option<i64>,
    pub outcome: DownloadOutcome,
    pub reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One applied transition, written with the transition itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub id: i64,
    pub order_id: i64,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub changed_by: Option<i64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Gateway facts recorded when a payment is confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub payment_id: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Approved,
        OrderStatus::Completed,
        OrderStatus::Rejected,
        OrderStatus::Failed,
    ];

    fn approved_order(now: DateTime<Utc>) -> Order {
        Order {
            id: 1,
            order_number: "ORD-1".into(),
            customer_email: "jane@example.com".into(),
            customer_name: "Jane".into(),
            customer_phone: None,
            subtotal_minor: 100,
            discount_minor: 0,
            tax_minor: 0,
            total_minor: 100,
            base_currency: "INR".into(),
            currency_code: "INR".into(),
            exchange_rate_micros: 1_000_000,
            total_converted_minor: 100,
            payment_method: "razorpay".into(),
            gateway_intent_id: Some("order_1".into()),
            gateway_payment_id: Some("pay_1".into()),
            gateway_signature: Some("sig".into()),
            status: OrderStatus::Approved,
            payment_status: PaymentStatus::Success,
            reviewed_by: Some(7),
            reviewed_at: Some(now),
            rejection_reason: None,
            download_token: "token".into(),
            download_count: 0,
            max_downloads: 3,
            download_expires_at: Some(now + Duration::days(30)),
            ip_address: None,
            user_agent: None,
            created_at: now,
            updated_at: now,
            paid_at: Some(now),
            completed_at: None,
        }
    }

    #[test]
    fn only_forward_edges_are_allowed() {
        let allowed: Vec<(OrderStatus, OrderStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (OrderStatus::Pending, OrderStatus::Paid),
                (OrderStatus::Pending, OrderStatus::Failed),
                (OrderStatus::Paid, OrderStatus::Approved),
                (OrderStatus::Paid, OrderStatus::Rejected),
                (OrderStatus::Approved, OrderStatus::Completed),
            ]
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in [OrderStatus::Completed, OrderStatus::Rejected, OrderStatus::Failed] {
            assert!(ALL.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn status_text_round_trips() {
        for status in ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("cancelled"), None);
    }

    #[test]
    fn download_denial_checks_status_then_expiry_then_count() {
        let now = Utc::now();
        let mut order = approved_order(now);
        assert_eq!(order.download_denial(now), None);

        order.download_count = 3;
        assert_eq!(order.download_denial(now), Some(DownloadDenial::LimitExceeded));

        order.download_expires_at = Some(now - Duration::seconds(1));
        assert_eq!(order.download_denial(now), Some(DownloadDenial::LinkExpired));

        order.status = OrderStatus::Paid;
        assert_eq!(order.download_denial(now), Some(DownloadDenial::NotApproved));
    }

    #[test]
    fn secrets_are_not_serialized() {
        let order = approved_order(Utc::now());
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("download_token").is_none());
        assert!(json.get("gateway_signature").is_none());
        assert_eq!(json["status"], "approved");
    }
}
