//! Process-local implementations of the store, catalog and notifier contracts.
//!
//! Each guarded write holds the table lock for the whole check-and-apply, which gives
//! the same compare-and-swap behaviour as the conditional UPDATEs in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_catalog::{CatalogError, Template, TemplateCatalog};
use folio_core::notification::{
    approval_event, confirmation_event, rejection_event, ApprovalNotice, Notifier, NotifyError,
};
use folio_core::order::{
    DownloadLog, NewDownloadLog, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus,
    PaymentConfirmation, PaymentStatus, StatusChange,
};
use folio_core::repository::{OrderFilter, OrderPage, OrderRepository, OrderSort, Pagination};
use folio_core::{StoreError, StoreResult};
use folio_shared::models::events::NotificationEvent;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct Tables {
    orders: BTreeMap<i64, Order>,
    items: Vec<OrderItem>,
    logs: Vec<DownloadLog>,
    history: Vec<StatusChange>,
    last_order_id: i64,
    last_item_id: i64,
    last_log_id: i64,
    last_history_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl Tables {
    fn record_history(
        &mut self,
        order_id: i64,
        from: Option<OrderStatus>,
        to: OrderStatus,
        changed_by: Option<i64>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) {
        let id = next_id(&mut self.last_history_id);
        self.history.push(StatusChange {
            id,
            order_id,
            from_status: from,
            to_status: to,
            changed_by,
            note,
            created_at: now,
        });
    }

    /// Apply `to` only if the state machine allows it from the current status.
    fn transition<F>(
        &mut self,
        order_id: i64,
        to: OrderStatus,
        changed_by: Option<i64>,
        note: Option<String>,
        now: DateTime<Utc>,
        apply: F,
    ) -> Option<Order>
    where
        F: FnOnce(&mut Order),
    {
        let order = self.orders.get_mut(&order_id)?;
        let from = order.status;
        if !from.can_transition_to(to) {
            return None;
        }
        apply(order);
        order.status = to;
        order.updated_at = now;
        let updated = order.clone();
        self.record_history(order_id, Some(from), to, changed_by, note, now);
        Some(updated)
    }

    fn append_log(&mut self, log: &NewDownloadLog, now: DateTime<Utc>) -> DownloadLog {
        let entry = DownloadLog {
            id: next_id(&mut self.last_log_id),
            order_id: log.order_id,
            template_id: log.template_id,
            outcome: log.outcome,
            reason: log.reason.clone(),
            ip_address: log.ip_address.clone(),
            user_agent: log.user_agent.clone(),
            downloaded_at: now,
        };
        self.logs.push(entry.clone());
        entry
    }
}

fn sort_orders(orders: &mut [Order], sort: OrderSort) {
    match sort {
        OrderSort::Newest => orders.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id))),
        OrderSort::Oldest => orders.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id))),
        OrderSort::AmountHigh => orders.sort_by(|a, b| (b.total_minor, b.id).cmp(&(a.total_minor, a.id))),
        OrderSort::AmountLow => orders.sort_by(|a, b| (a.total_minor, a.id).cmp(&(b.total_minor, b.id))),
    }
}

fn paginate(orders: Vec<Order>, page: Pagination) -> OrderPage {
    let total = orders.len() as i64;
    let orders = orders
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    OrderPage { orders, total }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    tables: RwLock<Tables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn create_order(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> StoreResult<(Order, Vec<OrderItem>)> {
        let mut tables = self.tables.write().await;
        if tables.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(StoreError::Duplicate(format!("order_number {}", order.order_number)));
        }
        if tables.orders.values().any(|o| o.download_token == order.download_token) {
            return Err(StoreError::Duplicate("download_token".to_string()));
        }

        let now = Utc::now();
        let id = next_id(&mut tables.last_order_id);
        let created = Order {
            id,
            order_number: order.order_number.clone(),
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name.clone(),
            customer_phone: order.customer_phone.clone(),
            subtotal_minor: order.subtotal_minor,
            discount_minor: order.discount_minor,
            tax_minor: order.tax_minor,
            total_minor: order.total_minor,
            base_currency: order.base_currency.clone(),
            currency_code: order.currency_code.clone(),
            exchange_rate_micros: order.exchange_rate_micros,
            total_converted_minor: order.total_converted_minor,
            payment_method: order.payment_method.clone(),
            gateway_intent_id: None,
            gateway_payment_id: None,
            gateway_signature: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            download_token: order.download_token.clone(),
            download_count: 0,
            max_downloads: order.max_downloads,
            download_expires_at: None,
            ip_address: order.ip_address.clone(),
            user_agent: order.user_agent.clone(),
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
        };

        let mut created_items = Vec::with_capacity(items.len());
        for item in items {
            let item_id = next_id(&mut tables.last_item_id);
            created_items.push(OrderItem {
                id: item_id,
                order_id: id,
                template_id: item.template_id,
                template_title: item.template_title.clone(),
                template_slug: item.template_slug.clone(),
                template_file_ref: item.template_file_ref.clone(),
                price_minor: item.price_minor,
                created_at: now,
            });
        }

        tables.orders.insert(id, created.clone());
        tables.items.extend(created_items.iter().cloned());
        tables.record_history(id, None, OrderStatus::Pending, None, Some("order created".into()), now);
        Ok((created, created_items))
    }

    async fn attach_intent(&self, order_id: i64, intent_id: &str) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        if tables
            .orders
            .values()
            .any(|o| o.gateway_intent_id.as_deref() == Some(intent_id))
        {
            return Err(StoreError::Duplicate(format!("gateway_intent_id {}", intent_id)));
        }
        let Some(order) = tables.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if order.status != OrderStatus::Pending || order.gateway_intent_id.is_some() {
            return Ok(None);
        }
        order.gateway_intent_id = Some(intent_id.to_string());
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> StoreResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.gateway_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn find_by_number_and_email(
        &self,
        order_number: &str,
        email: &str,
    ) -> StoreResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.order_number == order_number && o.customer_email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_download_token(&self, token: &str) -> StoreResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.values().find(|o| o.download_token == token).cloned())
    }

    async fn items_for(&self, order_id: i64) -> StoreResult<Vec<OrderItem>> {
        let tables = self.tables.read().await;
        Ok(tables.items.iter().filter(|i| i.order_id == order_id).cloned().collect())
    }

    async fn mark_paid(
        &self,
        order_id: i64,
        payment: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        Ok(tables.transition(
            order_id,
            OrderStatus::Paid,
            None,
            Some(format!("payment {} verified", payment.payment_id)),
            now,
            |order| {
                order.gateway_payment_id = Some(payment.payment_id.clone());
                order.gateway_signature = Some(payment.signature.clone());
                order.payment_status = PaymentStatus::Success;
                order.paid_at = Some(now);
            },
        ))
    }

    async fn mark_failed(
        &self,
        order_id: i64,
        note: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        Ok(tables.transition(
            order_id,
            OrderStatus::Failed,
            None,
            Some(note.to_string()),
            now,
            |order| order.payment_status = PaymentStatus::Failed,
        ))
    }

    async fn record_late_payment(
        &self,
        order_id: i64,
        payment: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if order.status != OrderStatus::Failed || order.gateway_payment_id.is_some() {
            return Ok(None);
        }
        order.gateway_payment_id = Some(payment.payment_id.clone());
        order.gateway_signature = Some(payment.signature.clone());
        order.payment_status = PaymentStatus::Success;
        order.updated_at = now;
        let updated = order.clone();
        tables.record_history(
            order_id,
            Some(OrderStatus::Failed),
            OrderStatus::Failed,
            None,
            Some(format!("payment {} captured after failure, refund required", payment.payment_id)),
            now,
        );
        Ok(Some(updated))
    }

    async fn approve(
        &self,
        order_id: i64,
        admin_id: i64,
        link_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        Ok(tables.transition(
            order_id,
            OrderStatus::Approved,
            Some(admin_id),
            None,
            now,
            |order| {
                order.reviewed_by = Some(admin_id);
                order.reviewed_at = Some(now);
                order.download_expires_at = Some(link_expires_at);
            },
        ))
    }

    async fn reject(
        &self,
        order_id: i64,
        admin_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        Ok(tables.transition(
            order_id,
            OrderStatus::Rejected,
            Some(admin_id),
            Some(reason.to_string()),
            now,
            |order| {
                order.reviewed_by = Some(admin_id);
                order.reviewed_at = Some(now);
                order.rejection_reason = Some(reason.to_string());
            },
        ))
    }

    async fn record_download(
        &self,
        order_id: i64,
        log: &NewDownloadLog,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        let first = order.status.can_transition_to(OrderStatus::Completed);
        let downloadable = (first || order.status == OrderStatus::Completed)
            && order.download_expires_at.map_or(true, |at| at > now)
            && order.download_count < order.max_downloads;
        if !downloadable {
            return Ok(None);
        }

        order.download_count += 1;
        order.updated_at = now;
        if first {
            order.status = OrderStatus::Completed;
            order.completed_at = Some(now);
        }
        let updated = order.clone();

        if first {
            tables.record_history(
                order_id,
                Some(OrderStatus::Approved),
                OrderStatus::Completed,
                None,
                Some("first download".into()),
                now,
            );
        }
        tables.append_log(log, now);
        Ok(Some(updated))
    }

    async fn append_download_log(&self, log: &NewDownloadLog) -> StoreResult<DownloadLog> {
        let mut tables = self.tables.write().await;
        Ok(tables.append_log(log, Utc::now()))
    }

    async fn download_logs(&self, order_id: i64) -> StoreResult<Vec<DownloadLog>> {
        let tables = self.tables.read().await;
        Ok(tables.logs.iter().filter(|l| l.order_id == order_id).cloned().collect())
    }

    async fn status_history(&self, order_id: i64) -> StoreResult<Vec<StatusChange>> {
        let tables = self.tables.read().await;
        Ok(tables.history.iter().filter(|h| h.order_id == order_id).cloned().collect())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage> {
        let tables = self.tables.read().await;
        let needle = filter.email_contains.as_ref().map(|e| e.to_ascii_lowercase());
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .filter(|o| filter.payment_status.map_or(true, |s| o.payment_status == s))
            .filter(|o| {
                needle
                    .as_ref()
                    .map_or(true, |n| o.customer_email.to_ascii_lowercase().contains(n))
            })
            .filter(|o| filter.created_from.map_or(true, |from| o.created_at >= from))
            .filter(|o| filter.created_to.map_or(true, |to| o.created_at <= to))
            .cloned()
            .collect();
        sort_orders(&mut orders, filter.sort);
        Ok(paginate(orders, filter.page))
    }

    async fn list_awaiting_approval(&self, page: Pagination) -> StoreResult<OrderPage> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Paid)
            .cloned()
            .collect();
        orders.sort_by(|a, b| (a.paid_at, a.id).cmp(&(b.paid_at, b.id)));
        Ok(paginate(orders, page))
    }

    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Order>> {
        let mut tables = self.tables.write().await;
        let stale: Vec<i64> = tables
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Pending
                    && o.gateway_intent_id.is_none()
                    && o.created_at < created_before
            })
            .map(|o| o.id)
            .collect();

        let mut failed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(order) = tables.transition(
                id,
                OrderStatus::Failed,
                None,
                Some("abandoned".into()),
                now,
                |order| order.payment_status = PaymentStatus::Failed,
            ) {
                failed.push(order);
            }
        }
        Ok(failed)
    }
}

/// Fixed template set
pub struct InMemoryCatalog {
    templates: HashMap<i64, Template>,
}

impl InMemoryCatalog {
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryCatalog {
    async fn resolve_by_ids(&self, ids: &[i64]) -> Result<Vec<Template>, CatalogError> {
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| self.templates.get(id).cloned())
            .collect())
    }
}

/// Keeps every event it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail without recording.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, kind: &str) -> usize {
        self.events.lock().await.iter().filter(|e| e.kind() == kind).count()
    }

    async fn record(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("mailer offline".to_string()));
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(&self, order: &Order, items: &[OrderItem]) -> Result<(), NotifyError> {
        self.record(confirmation_event(order, items, Utc::now())).await
    }

    async fn send_approval(&self, order: &Order, notice: &ApprovalNotice) -> Result<(), NotifyError> {
        self.record(approval_event(order, notice, Utc::now())).await
    }

    async fn send_rejection(&self, order: &Order, reason: &str) -> Result<(), NotifyError> {
        self.record(rejection_event(order, reason, Utc::now())).await
    }
}
