use folio_core::notification::NotifyError;
use folio_shared::pii::Masked;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

/// Await a notification for at most `timeout`, logging the outcome.
/// The state change being reported is already committed, so nothing is returned.
pub(crate) async fn deliver<F>(kind: &'static str, order_number: &str, email: &str, timeout: Duration, send: F)
where
    F: Future<Output = Result<(), NotifyError>>,
{
    let recipient = Masked(email.to_string());
    match tokio::time::timeout(timeout, send).await {
        Ok(Ok(())) => info!("{} notification queued for {} ({})", kind, order_number, recipient),
        Ok(Err(e)) => error!("{} notification for {} failed: {}", kind, order_number, e),
        Err(_) => error!(
            "{} notification for {} failed: {}",
            kind,
            order_number,
            NotifyError::Timeout(timeout)
        ),
    }
}
