use crate::error::OrderError;
use chrono::{Duration, Utc};
use folio_core::repository::OrderRepository;
use std::sync::Arc;
use tracing::info;

/// Fails pending orders that never got a gateway intent within `pending_ttl`. Orders
/// with an intent are settled by the gateway or the client callback instead.
pub struct PendingOrderSweeper {
    store: Arc<dyn OrderRepository>,
    pending_ttl: Duration,
}

impl PendingOrderSweeper {
    pub fn new(store: Arc<dyn OrderRepository>, pending_ttl: Duration) -> Self {
        Self { store, pending_ttl }
    }

    /// One pass. Returns how many orders were failed.
    pub async fn sweep_once(&self) -> Result<usize, OrderError> {
        let now = Utc::now();
        let failed = self.store.fail_stale_pending(now - self.pending_ttl, now).await?;
        for order in &failed {
            info!("Order {} abandoned, marked failed", order.order_number);
        }
        Ok(failed.len())
    }
}
