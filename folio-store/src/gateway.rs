use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use folio_core::payment::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};
use folio_core::signature::SignatureKeys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct GatewayOrder {
    id: String,
    amount: i64,
    currency: String,
    receipt: Option<String>,
    created_at: Option<i64>,
}

/// Razorpay Orders API client.
///
/// The key secret authenticates API calls and signs client callbacks; webhooks are
/// signed with their own secret configured on the dashboard.
pub struct RazorpayGateway {
    http: reqwest::Client,
    timeout: Duration,
    api_base: String,
    key_id: String,
    key_secret: String,
    keys: SignatureKeys,
}

impl RazorpayGateway {
    pub fn new(
        api_base: &str,
        key_id: &str,
        key_secret: &str,
        webhook_secret: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            timeout,
            api_base: api_base.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            keys: SignatureKeys::new(key_secret, webhook_secret),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let body = CreateOrderBody {
            amount: request.amount_minor,
            currency: &request.currency,
            receipt: &request.reference,
            notes: &request.notes,
        };

        let resp = self
            .http
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Unavailable(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let order: GatewayOrder =
            serde_json::from_str(&text).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if order.amount != request.amount_minor {
            return Err(GatewayError::InvalidResponse(format!(
                "intent {} opened for {} instead of {}",
                order.id, order.amount, request.amount_minor
            )));
        }

        let created_at = order
            .created_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        Ok(PaymentIntent {
            id: order.id,
            amount_minor: order.amount,
            currency: order.currency,
            reference: order.receipt.unwrap_or_else(|| request.reference.clone()),
            created_at,
        })
    }

    fn verify_client_signature(&self, intent_id: &str, payment_id: &str, signature: &str) -> bool {
        self.keys.verify_client(intent_id, payment_id, signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.keys.verify_webhook(payload, signature)
    }
}
