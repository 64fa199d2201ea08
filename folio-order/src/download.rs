use crate::error::OrderError;
use chrono::Utc;
use folio_core::order::{DownloadDenial, DownloadOutcome, NewDownloadLog, Order, OrderItem};
use folio_core::repository::OrderRepository;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum DownloadCredential {
    Token(String),
    OrderAndEmail { order_number: String, email: String },
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub credential: DownloadCredential,
    /// Restrict the grant to one purchased template.
    pub template_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A counted, logged download. `items` are the snapshots to serve.
#[derive(Debug, Clone)]
pub struct DownloadGrant {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub remaining: i32,
}

pub struct DownloadAuthorizer {
    store: Arc<dyn OrderRepository>,
}

impl DownloadAuthorizer {
    pub fn new(store: Arc<dyn OrderRepository>) -> Self {
        Self { store }
    }

    pub async fn authorize(&self, request: DownloadRequest) -> Result<DownloadGrant, OrderError> {
        let order = match &request.credential {
            DownloadCredential::Token(token) if !token.is_empty() => {
                self.store.find_by_download_token(token).await?
            }
            DownloadCredential::OrderAndEmail { order_number, email } => {
                self.store
                    .find_by_number_and_email(order_number.trim(), &email.trim().to_ascii_lowercase())
                    .await?
            }
            DownloadCredential::Token(_) => None,
        }
        .ok_or_else(|| OrderError::NotFound("no order for these download credentials".to_string()))?;

        let mut items = self.store.items_for(order.id).await?;
        if let Some(template_id) = request.template_id {
            items.retain(|item| item.template_id == template_id);
            if items.is_empty() {
                return Err(OrderError::NotFound(format!(
                    "template {} is not part of order {}",
                    template_id, order.order_number
                )));
            }
        }

        let now = Utc::now();
        if let Some(denial) = order.download_denial(now) {
            return Err(self.deny(&order, &request, denial).await);
        }

        let log = NewDownloadLog {
            order_id: order.id,
            template_id: request.template_id,
            outcome: DownloadOutcome::Success,
            reason: None,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        };

        match self.store.record_download(order.id, &log, now).await? {
            Some(updated) => {
                info!(
                    "Download {}/{} for order {}",
                    updated.download_count, updated.max_downloads, updated.order_number
                );
                Ok(DownloadGrant {
                    remaining: updated.remaining_downloads(),
                    order: updated,
                    items,
                })
            }
            None => {
                // guard failed between the read and the increment
                let current = self.store.find_by_id(order.id).await?.unwrap_or(order);
                let denial = current
                    .download_denial(now)
                    .unwrap_or(DownloadDenial::LimitExceeded);
                Err(self.deny(&current, &request, denial).await)
            }
        }
    }

    async fn deny(&self, order: &Order, request: &DownloadRequest, denial: DownloadDenial) -> OrderError {
        warn!("Download refused for order {}: {}", order.order_number, denial.as_str());
        let log = NewDownloadLog {
            order_id: order.id,
            template_id: request.template_id,
            outcome: DownloadOutcome::Denied,
            reason: Some(denial.as_str().to_string()),
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        };
        if let Err(e) = self.store.append_download_log(&log).await {
            error!("Failed to log refused download for {}: {}", order.order_number, e);
        }
        denial.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOrderStore;
    use chrono::Duration;
    use folio_core::order::{NewOrder, NewOrderItem, OrderStatus, PaymentConfirmation};

    async fn approved_order(store: &InMemoryOrderStore, link_ttl: Duration) -> Order {
        let new_order = NewOrder {
            order_number: "ORD-20240101000000000-ABCD".into(),
            customer_email: "jane@example.com".into(),
            customer_name: "Jane".into(),
            customer_phone: None,
            subtotal_minor: 80000,
            discount_minor: 0,
            tax_minor: 0,
            total_minor: 80000,
            base_currency: "INR".into(),
            currency_code: "INR".into(),
            exchange_rate_micros: 1_000_000,
            total_converted_minor: 80000,
            payment_method: "razorpay".into(),
            download_token: "tok".into(),
            max_downloads: 3,
            ip_address: None,
            user_agent: None,
        };
        let items = [
            NewOrderItem {
                template_id: 1,
                template_title: "Budget".into(),
                template_slug: "budget".into(),
                template_file_ref: "t/budget.xlsx".into(),
                price_minor: 50000,
            },
            NewOrderItem {
                template_id: 2,
                template_title: "Invoice".into(),
                template_slug: "invoice".into(),
                template_file_ref: "t/invoice.docx".into(),
                price_minor: 30000,
            },
        ];
        let (order, _) = store.create_order(&new_order, &items).await.unwrap();
        let now = Utc::now();
        let payment = PaymentConfirmation { payment_id: "pay".into(), signature: "sig".into() };
        store.mark_paid(order.id, &payment, now).await.unwrap().unwrap();
        store.approve(order.id, 1, now + link_ttl, now).await.unwrap().unwrap()
    }

    fn by_token(token: &str) -> DownloadRequest {
        DownloadRequest {
            credential: DownloadCredential::Token(token.to_string()),
            template_id: None,
            ip_address: Some("198.51.100.4".into()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn first_download_completes_and_limit_is_enforced() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = approved_order(&store, Duration::days(30)).await;
        let authorizer = DownloadAuthorizer::new(store.clone());

        let grant = authorizer.authorize(by_token("tok")).await.unwrap();
        assert_eq!(grant.order.status, OrderStatus::Completed);
        assert_eq!(grant.order.download_count, 1);
        assert!(grant.order.completed_at.is_some());
        assert_eq!(grant.items.len(), 2);
        assert_eq!(grant.remaining, 2);

        authorizer.authorize(by_token("tok")).await.unwrap();
        let third = authorizer.authorize(by_token("tok")).await.unwrap();
        assert_eq!(third.order.download_count, 3);
        assert_eq!(third.remaining, 0);

        assert!(matches!(
            authorizer.authorize(by_token("tok")).await,
            Err(OrderError::DownloadLimitExceeded)
        ));

        let logs = store.download_logs(order.id).await.unwrap();
        assert_eq!(logs.iter().filter(|l| l.outcome == DownloadOutcome::Success).count(), 3);
        let denied: Vec<_> = logs.iter().filter(|l| l.outcome == DownloadOutcome::Denied).collect();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].reason.as_deref(), Some("download_limit_exceeded"));
    }

    #[tokio::test]
    async fn expired_link_is_refused_regardless_of_count() {
        let store = Arc::new(InMemoryOrderStore::new());
        approved_order(&store, Duration::seconds(-1)).await;
        let authorizer = DownloadAuthorizer::new(store.clone());

        assert!(matches!(
            authorizer.authorize(by_token("tok")).await,
            Err(OrderError::LinkExpired)
        ));
    }

    #[tokio::test]
    async fn unknown_credentials_and_unapproved_orders() {
        let store = Arc::new(InMemoryOrderStore::new());
        let authorizer = DownloadAuthorizer::new(store.clone());
        assert!(matches!(authorizer.authorize(by_token("nope")).await, Err(OrderError::NotFound(_))));
        assert!(matches!(authorizer.authorize(by_token("")).await, Err(OrderError::NotFound(_))));

        let new_order = NewOrder {
            order_number: "ORD-P".into(),
            customer_email: "pat@example.com".into(),
            customer_name: "Pat".into(),
            customer_phone: None,
            subtotal_minor: 1,
            discount_minor: 0,
            tax_minor: 0,
            total_minor: 1,
            base_currency: "INR".into(),
            currency_code: "INR".into(),
            exchange_rate_micros: 1_000_000,
            total_converted_minor: 1,
            payment_method: "razorpay".into(),
            download_token: "pending-token".into(),
            max_downloads: 3,
            ip_address: None,
            user_agent: None,
        };
        store.create_order(&new_order, &[]).await.unwrap();
        let request = DownloadRequest {
            credential: DownloadCredential::OrderAndEmail {
                order_number: "ORD-P".into(),
                email: "Pat@Example.com".into(),
            },
            template_id: None,
            ip_address: None,
            user_agent: None,
        };
        assert!(matches!(authorizer.authorize(request).await, Err(OrderError::OrderNotApproved)));
    }

    #[tokio::test]
    async fn template_filter_must_match_an_item() {
        let store = Arc::new(InMemoryOrderStore::new());
        approved_order(&store, Duration::days(1)).await;
        let authorizer = DownloadAuthorizer::new(store.clone());

        let mut request = by_token("tok");
        request.template_id = Some(2);
        let grant = authorizer.authorize(request.clone()).await.unwrap();
        assert_eq!(grant.items.len(), 1);
        assert_eq!(grant.items[0].template_file_ref, "t/invoice.docx");

        request.template_id = Some(9);
        assert!(matches!(authorizer.authorize(request).await, Err(OrderError::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_downloads_never_exceed_the_limit() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = approved_order(&store, Duration::days(1)).await;
        let authorizer = Arc::new(DownloadAuthorizer::new(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let authorizer = authorizer.clone();
            handles.push(tokio::spawn(async move { authorizer.authorize(by_token("tok")).await }));
        }
        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(OrderError::DownloadLimitExceeded) => {}
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!(granted, 3);
        let current = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(current.download_count, 3);
    }
}
