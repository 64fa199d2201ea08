use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::order::{
    DownloadLog, DownloadOutcome, NewDownloadLog, NewOrder, NewOrderItem, Order, OrderItem,
    OrderStatus, PaymentConfirmation, PaymentStatus, StatusChange,
};
use folio_core::repository::{OrderFilter, OrderPage, OrderRepository, OrderSort, Pagination};
use folio_core::{StoreError, StoreResult};
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

/// Postgres-backed order store. Every status change is an
/// `UPDATE ... WHERE status = <expected> RETURNING *` inside a transaction that also
/// writes the history row.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn store_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Duplicate(db.constraint().unwrap_or("unique constraint").to_string());
        }
    }
    StoreError::Backend(e.to_string())
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    order_number: String,
    customer_email: String,
    customer_name: String,
    customer_phone: Option<String>,
    subtotal_minor: i64,
    discount_minor: i64,
    tax_minor: i64,
    total_minor: i64,
    base_currency: String,
    currency_code: String,
    exchange_rate_micros: i64,
    total_converted_minor: i64,
    payment_method: String,
    gateway_intent_id: Option<String>,
    gateway_payment_id: Option<String>,
    gateway_signature: Option<String>,
    status: String,
    payment_status: String,
    reviewed_by: Option<i64>,
    reviewed_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    download_token: String,
    download_count: i32,
    max_downloads: i32,
    download_expires_at: Option<DateTime<Utc>>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

fn order_status(value: &str) -> StoreResult<OrderStatus> {
    OrderStatus::parse(value).ok_or_else(|| StoreError::Corrupt(format!("order status '{}'", value)))
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = order_status(&row.status)?;
        let payment_status = PaymentStatus::parse(&row.payment_status)
            .ok_or_else(|| StoreError::Corrupt(format!("payment status '{}'", row.payment_status)))?;

        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            customer_email: row.customer_email,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            subtotal_minor: row.subtotal_minor,
            discount_minor: row.discount_minor,
            tax_minor: row.tax_minor,
            total_minor: row.total_minor,
            base_currency: row.base_currency,
            currency_code: row.currency_code,
            exchange_rate_micros: row.exchange_rate_micros,
            total_converted_minor: row.total_converted_minor,
            payment_method: row.payment_method,
            gateway_intent_id: row.gateway_intent_id,
            gateway_payment_id: row.gateway_payment_id,
            gateway_signature: row.gateway_signature,
            status,
            payment_status,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            rejection_reason: row.rejection_reason,
            download_token: row.download_token,
            download_count: row.download_count,
            max_downloads: row.max_downloads,
            download_expires_at: row.download_expires_at,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    template_id: i64,
    template_title: String,
    template_slug: String,
    template_file_ref: String,
    price_minor: i64,
    created_at: DateTime<Utc>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            template_id: row.template_id,
            template_title: row.template_title,
            template_slug: row.template_slug,
            template_file_ref: row.template_file_ref,
            price_minor: row.price_minor,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DownloadLogRow {
    id: i64,
    order_id: i64,
    template_id: Option<i64>,
    outcome: String,
    reason: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    downloaded_at: DateTime<Utc>,
}

impl TryFrom<DownloadLogRow> for DownloadLog {
    type Error = StoreError;

    fn try_from(row: DownloadLogRow) -> Result<Self, Self::Error> {
        let outcome = DownloadOutcome::parse(&row.outcome)
            .ok_or_else(|| StoreError::Corrupt(format!("download outcome '{}'", row.outcome)))?;
        Ok(DownloadLog {
            id: row.id,
            order_id: row.order_id,
            template_id: row.template_id,
            outcome,
            reason: row.reason,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            downloaded_at: row.downloaded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatusChangeRow {
    id: i64,
    order_id: i64,
    from_status: Option<String>,
    to_status: String,
    changed_by: Option<i64>,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<StatusChangeRow> for StatusChange {
    type Error = StoreError;

    fn try_from(row: StatusChangeRow) -> Result<Self, Self::Error> {
        Ok(StatusChange {
            id: row.id,
            order_id: row.order_id,
            from_status: row.from_status.as_deref().map(order_status).transpose()?,
            to_status: order_status(&row.to_status)?,
            changed_by: row.changed_by,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

fn into_orders(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

async fn insert_history(
    conn: &mut PgConnection,
    order_id: i64,
    from: Option<OrderStatus>,
    to: OrderStatus,
    changed_by: Option<i64>,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_status_history (order_id, from_status, to_status, changed_by, note, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(order_id)
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(changed_by)
    .bind(note)
    .bind(now)
    .execute(conn)
    .await
    .map_err(store_err)?;
    Ok(())
}

async fn insert_download_log(
    conn: &mut PgConnection,
    log: &NewDownloadLog,
    now: DateTime<Utc>,
) -> StoreResult<DownloadLog> {
    let row = sqlx::query_as::<_, DownloadLogRow>(
        r#"
        INSERT INTO download_logs (order_id, template_id, outcome, reason, ip_address, user_agent, downloaded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(log.order_id)
    .bind(log.template_id)
    .bind(log.outcome.as_str())
    .bind(log.reason.as_deref())
    .bind(log.ip_address.as_deref())
    .bind(log.user_agent.as_deref())
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(store_err)?;
    row.try_into()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(payment_status) = filter.payment_status {
        qb.push(" AND payment_status = ").push_bind(payment_status.as_str());
    }
    if let Some(email) = filter.email_contains.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        let escaped = email.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        qb.push(" AND customer_email ILIKE ")
            .push_bind(format!("%{}%", escaped));
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

fn sort_clause(sort: OrderSort) -> &'static str {
    match sort {
        OrderSort::Newest => " ORDER BY created_at DESC, id DESC",
        OrderSort::Oldest => " ORDER BY created_at ASC, id ASC",
        OrderSort::AmountHigh => " ORDER BY total_minor DESC, id DESC",
        OrderSort::AmountLow => " ORDER BY total_minor ASC, id ASC",
    }
}

impl PgOrderRepository {
    /// Run a guarded UPDATE and, if it matched, record the transition.
    async fn transition(
        &self,
        update: QueryAs<'_, Postgres, OrderRow, PgArguments>,
        from: OrderStatus,
        changed_by: Option<i64>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let Some(row) = update.fetch_optional(&mut *tx).await.map_err(store_err)? else {
            return Ok(None);
        };
        let order = Order::try_from(row)?;
        insert_history(&mut tx, order.id, Some(from), order.status, changed_by, note, now).await?;

        tx.commit().await.map_err(store_err)?;
        Ok(Some(order))
    }

    async fn page(&self, filter: &OrderFilter) -> StoreResult<OrderPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders WHERE TRUE");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM orders WHERE TRUE");
        push_filters(&mut select, filter);
        select.push(sort_clause(filter.sort));
        select.push(" LIMIT ").push_bind(filter.page.limit());
        select.push(" OFFSET ").push_bind(filter.page.offset());
        let rows: Vec<OrderRow> = select
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(OrderPage { orders: into_orders(rows)?, total })
    }

    async fn find_one(&self, sql: &str, key: &str) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .map(Order::try_from)
            .transpose()
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create_order(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> StoreResult<(Order, Vec<OrderItem>)> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO orders (
                order_number, customer_email, customer_name, customer_phone,
                subtotal_minor, discount_minor, tax_minor, total_minor,
                base_currency, currency_code, exchange_rate_micros, total_converted_minor,
                payment_method, download_token, max_downloads, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(&order.order_number)
        .bind(&order.customer_email)
        .bind(&order.customer_name)
        .bind(order.customer_phone.as_deref())
        .bind(order.subtotal_minor)
        .bind(order.discount_minor)
        .bind(order.tax_minor)
        .bind(order.total_minor)
        .bind(&order.base_currency)
        .bind(&order.currency_code)
        .bind(order.exchange_rate_micros)
        .bind(order.total_converted_minor)
        .bind(&order.payment_method)
        .bind(&order.download_token)
        .bind(order.max_downloads)
        .bind(order.ip_address.as_deref())
        .bind(order.user_agent.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        let created = Order::try_from(row)?;

        let mut created_items = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, OrderItemRow>(
                r#"
                INSERT INTO order_items (order_id, template_id, template_title, template_slug, template_file_ref, price_minor)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(created.id)
            .bind(item.template_id)
            .bind(&item.template_title)
            .bind(&item.template_slug)
            .bind(&item.template_file_ref)
            .bind(item.price_minor)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_err)?;
            created_items.push(OrderItem::from(row));
        }

        insert_history(
            &mut tx,
            created.id,
            None,
            OrderStatus::Pending,
            None,
            Some("order created"),
            created.created_at,
        )
        .await?;

        tx.commit().await.map_err(store_err)?;
        Ok((created, created_items))
    }

    async fn attach_intent(&self, order_id: i64, intent_id: &str) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders SET gateway_intent_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND gateway_intent_id IS NULL
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .map(Order::try_from)
        .transpose()
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> StoreResult<Option<Order>> {
        self.find_one("SELECT * FROM orders WHERE gateway_intent_id = $1", intent_id).await
    }

    async fn find_by_number_and_email(
        &self,
        order_number: &str,
        email: &str,
    ) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE order_number = $1 AND LOWER(customer_email) = LOWER($2)",
        )
        .bind(order_number)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .map(Order::try_from)
        .transpose()
    }

    async fn find_by_download_token(&self, token: &str) -> StoreResult<Option<Order>> {
        self.find_one("SELECT * FROM orders WHERE download_token = $1", token).await
    }

    async fn items_for(&self, order_id: i64) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn mark_paid(
        &self,
        order_id: i64,
        payment: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let update = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'paid', payment_status = 'success',
                gateway_payment_id = $2, gateway_signature = $3,
                paid_at = $4, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(&payment.payment_id)
        .bind(&payment.signature)
        .bind(now);
        let note = format!("payment {} verified", payment.payment_id);
        self.transition(update, OrderStatus::Pending, None, Some(&note), now).await
    }

    async fn mark_failed(
        &self,
        order_id: i64,
        note: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let update = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'failed', payment_status = 'failed', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(now);
        self.transition(update, OrderStatus::Pending, None, Some(note), now).await
    }

    async fn record_late_payment(
        &self,
        order_id: i64,
        payment: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let update = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET payment_status = 'success',
                gateway_payment_id = $2, gateway_signature = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'failed' AND gateway_payment_id IS NULL
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(&payment.payment_id)
        .bind(&payment.signature)
        .bind(now);
        let note = format!("payment {} captured after failure, refund required", payment.payment_id);
        self.transition(update, OrderStatus::Failed, None, Some(&note), now).await
    }

    async fn approve(
        &self,
        order_id: i64,
        admin_id: i64,
        link_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let update = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'approved', reviewed_by = $2, reviewed_at = $3,
                download_expires_at = $4, updated_at = $3
            WHERE id = $1 AND status = 'paid'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(admin_id)
        .bind(now)
        .bind(link_expires_at);
        self.transition(update, OrderStatus::Paid, Some(admin_id), None, now).await
    }

    async fn reject(
        &self,
        order_id: i64,
        admin_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let update = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'rejected', reviewed_by = $2, reviewed_at = $3,
                rejection_reason = $4, updated_at = $3
            WHERE id = $1 AND status = 'paid'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(admin_id)
        .bind(now)
        .bind(reason);
        self.transition(update, OrderStatus::Paid, Some(admin_id), Some(reason), now).await
    }

    async fn record_download(
        &self,
        order_id: i64,
        log: &NewDownloadLog,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // SET expressions see the old row, RETURNING sees the new one
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET download_count = download_count + 1,
                status = CASE WHEN status = 'approved' THEN 'completed' ELSE status END,
                completed_at = CASE WHEN status = 'approved' THEN $2 ELSE completed_at END,
                updated_at = $2
            WHERE id = $1
              AND status IN ('approved', 'completed')
              AND download_count < max_downloads
              AND (download_expires_at IS NULL OR download_expires_at > $2)
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order = Order::try_from(row)?;

        // approved orders have never been downloaded
        if order.download_count == 1 && order.status == OrderStatus::Completed {
            insert_history(
                &mut tx,
                order.id,
                Some(OrderStatus::Approved),
                OrderStatus::Completed,
                None,
                Some("first download"),
                now,
            )
            .await?;
        }
        insert_download_log(&mut tx, log, now).await?;

        tx.commit().await.map_err(store_err)?;
        Ok(Some(order))
    }

    async fn append_download_log(&self, log: &NewDownloadLog) -> StoreResult<DownloadLog> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        insert_download_log(&mut conn, log, Utc::now()).await
    }

    async fn download_logs(&self, order_id: i64) -> StoreResult<Vec<DownloadLog>> {
        sqlx::query_as::<_, DownloadLogRow>(
            "SELECT * FROM download_logs WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(DownloadLog::try_from)
        .collect()
    }

    async fn status_history(&self, order_id: i64) -> StoreResult<Vec<StatusChange>> {
        sqlx::query_as::<_, StatusChangeRow>(
            "SELECT * FROM order_status_history WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(StatusChange::try_from)
        .collect()
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage> {
        self.page(filter).await
    }

    async fn list_awaiting_approval(&self, page: Pagination) -> StoreResult<OrderPage> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = 'paid'")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT * FROM orders
            WHERE status = 'paid'
            ORDER BY paid_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(OrderPage { orders: into_orders(rows)?, total })
    }

    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Order>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'failed', payment_status = 'failed', updated_at = $2
            WHERE status = 'pending' AND gateway_intent_id IS NULL AND created_at < $1
            RETURNING *
            "#,
        )
        .bind(created_before)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_err)?;
        let failed = into_orders(rows)?;

        for order in &failed {
            insert_history(
                &mut tx,
                order.id,
                Some(OrderStatus::Pending),
                OrderStatus::Failed,
                None,
                Some("abandoned"),
                now,
            )
            .await?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(failed)
    }
}
