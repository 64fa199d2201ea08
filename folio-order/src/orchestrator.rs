use chrono::Utc;
use folio_core::payment::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};
use folio_core::signature::SignatureKeys;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounds every gateway round trip and keeps the adapter swappable.
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    timeout: Duration,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub fn key_id(&self) -> &str {
        self.gateway.key_id()
    }

    /// Open an intent for an order total
    pub async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        match tokio::time::timeout(self.timeout, self.gateway.create_intent(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }

    pub fn verify_client_signature(&self, intent_id: &str, payment_id: &str, signature: &str) -> bool {
        self.gateway.verify_client_signature(intent_id, payment_id, signature)
    }

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.gateway.verify_webhook_signature(payload, signature)
    }
}

/// Offline gateway for tests and local runs. Signatures are real HMACs over the
/// configured secrets, so callers can sign with the same [`SignatureKeys`].
pub struct MockPaymentGateway {
    keys: SignatureKeys,
    next_id: AtomicU64,
    failing: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new(keys: SignatureKeys) -> Self {
        Self {
            keys,
            next_id: AtomicU64::new(1),
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent `create_intent` calls fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn intents_created(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn key_id(&self) -> &str {
        "rzp_test_mock"
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated gateway outage".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent {
            id: format!("order_mock_{:06}", n),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            reference: request.reference.clone(),
            created_at: Utc::now(),
        })
    }

    fn verify_client_signature(&self, intent_id: &str, payment_id: &str, signature: &str) -> bool {
        self.keys.verify_client(intent_id, payment_id, signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.keys.verify_webhook(payload, signature)
    }
}
