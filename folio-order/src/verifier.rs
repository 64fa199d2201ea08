use crate::error::OrderError;
use crate::notify::deliver;
use crate::orchestrator::PaymentOrchestrator;
use crate::policy::OrderPolicy;
use chrono::Utc;
use folio_core::notification::Notifier;
use folio_core::order::{Order, OrderStatus, PaymentConfirmation};
use folio_core::repository::OrderRepository;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a signature-valid confirmation
#[derive(Debug, Clone)]
pub enum Verification {
    /// This call performed pending -> paid.
    Confirmed(Order),
    /// Payment was already recorded; nothing changed.
    AlreadyConfirmed(Order),
}

impl Verification {
    pub fn order(&self) -> &Order {
        match self {
            Verification::Confirmed(order) | Verification::AlreadyConfirmed(order) => order,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Payment(Verification),
    MarkedFailed(Order),
    /// The capture arrived after the order failed. The payment is recorded for refund.
    CapturedAfterFailure(Order),
    /// Acknowledged without touching any order.
    Ignored(String),
}

/// Where a signature-valid capture landed.
enum Settlement {
    Applied(Verification),
    LateCapture(Order),
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<Wrapped<PaymentEntity>>,
    order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
}

impl WebhookPayload {
    fn intent_id(&self) -> Option<&str> {
        self.payment
            .as_ref()
            .and_then(|p| p.entity.order_id.as_deref())
            .or_else(|| self.order.as_ref().map(|o| o.entity.id.as_str()))
    }

    fn payment_id(&self) -> Option<&str> {
        self.payment.as_ref().map(|p| p.entity.id.as_str())
    }
}

/// Authenticates payment completion and performs pending -> paid.
///
/// The client callback and the gateway webhook may race on the same intent; the store's
/// guarded update picks one winner and the other call returns `AlreadyConfirmed`.
pub struct PaymentVerifier {
    store: Arc<dyn OrderRepository>,
    payments: Arc<PaymentOrchestrator>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<OrderPolicy>,
}

impl PaymentVerifier {
    pub fn new(
        store: Arc<dyn OrderRepository>,
        payments: Arc<PaymentOrchestrator>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<OrderPolicy>,
    ) -> Self {
        Self { store, payments, notifier, policy }
    }

    /// Client-submitted confirmation
    pub async fn verify_client(
        &self,
        intent_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<Verification, OrderError> {
        if intent_id.trim().is_empty() || payment_id.trim().is_empty() || signature.trim().is_empty() {
            return Err(OrderError::Validation(
                "intent id, payment id and signature are required".to_string(),
            ));
        }

        let order = self
            .store
            .find_by_intent_id(intent_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(intent_id.to_string()))?;

        if !self.payments.verify_client_signature(intent_id, payment_id, signature) {
            warn!("Invalid payment signature for order {}", order.order_number);
            // guarded pending -> failed; a confirmed order is left alone
            if self
                .store
                .mark_failed(order.id, "invalid payment signature", Utc::now())
                .await?
                .is_some()
            {
                info!("Order {} marked failed", order.order_number);
            }
            return Err(OrderError::InvalidSignature);
        }

        let confirmation = PaymentConfirmation {
            payment_id: payment_id.to_string(),
            signature: signature.to_string(),
        };
        match self.settle(order, &confirmation).await? {
            Settlement::Applied(verification) => Ok(verification),
            Settlement::LateCapture(order) => Err(OrderError::InvalidStatus {
                current: order.status,
                attempted: OrderStatus::Paid,
            }),
        }
    }

    /// Gateway webhook. The body is only parsed once its signature checks out.
    ///
    /// A signed event that cannot be applied is acknowledged as `Ignored` so the gateway
    /// stops redelivering it. Only a bad signature or a store failure is an error.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome, OrderError> {
        if !self.payments.verify_webhook_signature(payload, signature) {
            warn!("Rejected webhook with invalid signature ({} bytes)", payload.len());
            return Err(OrderError::InvalidSignature);
        }

        let envelope: WebhookEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring signed webhook with malformed payload: {}", e);
                return Ok(WebhookOutcome::Ignored(format!("malformed payload: {}", e)));
            }
        };

        match envelope.event.as_str() {
            "payment.captured" | "order.paid" => {
                let (Some(intent_id), Some(payment_id)) =
                    (envelope.payload.intent_id(), envelope.payload.payment_id())
                else {
                    warn!("Webhook {} without payment details", envelope.event);
                    return Ok(WebhookOutcome::Ignored(format!(
                        "{} without payment details",
                        envelope.event
                    )));
                };
                let Some(order) = self.store.find_by_intent_id(intent_id).await? else {
                    warn!("Webhook {} for unknown intent {}", envelope.event, intent_id);
                    return Ok(WebhookOutcome::Ignored(format!("unknown intent {}", intent_id)));
                };
                let order_number = order.order_number.clone();
                let confirmation = PaymentConfirmation {
                    payment_id: payment_id.to_string(),
                    signature: signature.to_string(),
                };
                match self.settle(order, &confirmation).await {
                    Ok(Settlement::Applied(verification)) => Ok(WebhookOutcome::Payment(verification)),
                    Ok(Settlement::LateCapture(order)) => Ok(WebhookOutcome::CapturedAfterFailure(order)),
                    Err(OrderError::InvalidStatus { current, .. }) => {
                        warn!("Webhook {} for order {} in status {}", envelope.event, order_number, current);
                        Ok(WebhookOutcome::Ignored(format!("order {} is {}", order_number, current)))
                    }
                    Err(e) => Err(e),
                }
            }
            "payment.failed" => {
                let Some(intent_id) = envelope.payload.intent_id() else {
                    warn!("Webhook payment.failed without order id");
                    return Ok(WebhookOutcome::Ignored("payment.failed without order id".to_string()));
                };
                let Some(order) = self.store.find_by_intent_id(intent_id).await? else {
                    warn!("Webhook payment.failed for unknown intent {}", intent_id);
                    return Ok(WebhookOutcome::Ignored(format!("unknown intent {}", intent_id)));
                };
                match self
                    .store
                    .mark_failed(order.id, "gateway reported payment failure", Utc::now())
                    .await?
                {
                    Some(failed) => {
                        info!("Order {} marked failed by gateway", failed.order_number);
                        Ok(WebhookOutcome::MarkedFailed(failed))
                    }
                    None => Ok(WebhookOutcome::Ignored(format!(
                        "order {} is {}",
                        order.order_number, order.status
                    ))),
                }
            }
            other => {
                debug!("Ignoring webhook event {}", other);
                Ok(WebhookOutcome::Ignored(other.to_string()))
            }
        }
    }

    async fn settle(&self, order: Order, confirmation: &PaymentConfirmation) -> Result<Settlement, OrderError> {
        if order.status.is_payment_confirmed() {
            debug!("Order {} already confirmed", order.order_number);
            return Ok(Settlement::Applied(Verification::AlreadyConfirmed(order)));
        }
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return self.late_capture(order, confirmation).await;
        }

        let Some(paid) = self.store.mark_paid(order.id, confirmation, Utc::now()).await? else {
            // lost the race; settle on whatever won
            let current = self
                .store
                .find_by_id(order.id)
                .await?
                .ok_or_else(|| OrderError::NotFound(order.order_number.clone()))?;
            if current.status.is_payment_confirmed() {
                return Ok(Settlement::Applied(Verification::AlreadyConfirmed(current)));
            }
            return self.late_capture(current, confirmation).await;
        };

        info!("Order {} paid ({})", paid.order_number, confirmation.payment_id);

        let items = self.store.items_for(paid.id).await?;
        deliver(
            "Order confirmation",
            &paid.order_number,
            &paid.customer_email,
            self.policy.notify_timeout,
            self.notifier.send_order_confirmation(&paid, &items),
        )
        .await;

        Ok(Settlement::Applied(Verification::Confirmed(paid)))
    }

    /// A verified capture for an order that already failed. The money has moved, so keep
    /// the payment id on the order for refund reconciliation.
    async fn late_capture(&self, order: Order, confirmation: &PaymentConfirmation) -> Result<Settlement, OrderError> {
        if order.status != OrderStatus::Failed {
            return Err(OrderError::InvalidStatus {
                current: order.status,
                attempted: OrderStatus::Paid,
            });
        }
        match self
            .store
            .record_late_payment(order.id, confirmation, Utc::now())
            .await?
        {
            Some(recorded) => {
                warn!(
                    "Payment {} captured for failed order {}, refund required",
                    confirmation.payment_id, recorded.order_number
                );
                Ok(Settlement::LateCapture(recorded))
            }
            None => Ok(Settlement::LateCapture(order)),
        }
    }
}
