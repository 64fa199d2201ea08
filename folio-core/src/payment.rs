use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to open a payment intent for an order total
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentRequest {
    /// Minor units of `currency`; must equal the order total.
    pub amount_minor: i64,
    pub currency: String,
    /// Our order number, echoed back by the gateway as its receipt.
    pub reference: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String, // gateway's id, e.g. order_Nx3...
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected payment gateway response: {0}")]
    InvalidResponse(String),

    #[error("Payment gateway did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Remote payment provider.
///
/// The two verification methods are pure: they hold the shared secrets and never
/// touch the network.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key id the checkout widget needs to open the intent.
    fn key_id(&self) -> &str;

    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError>;

    fn verify_client_signature(&self, intent_id: &str, payment_id: &str, signature: &str) -> bool;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}
