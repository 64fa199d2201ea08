use std::sync::Arc;
use folio_order::PendingOrderSweeper;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Fails abandoned pending orders on a fixed interval. Runs until the task is dropped.
pub async fn start_pending_sweeper(sweeper: Arc<PendingOrderSweeper>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Pending-order sweeper started, running every {:?}", every);

    loop {
        ticker.tick().await;
        match sweeper.sweep_once().await {
            Ok(0) => {}
            Ok(swept) => info!("Sweeper failed {} abandoned pending orders", swept),
            Err(e) => error!("Pending-order sweep failed: {}", e),
        }
    }
}
