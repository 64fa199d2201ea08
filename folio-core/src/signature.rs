//! HMAC-SHA256 signing shared by the client callback and webhook paths.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn sign_hex(secret: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature. Malformed hex never matches.
pub fn verify_hex(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Canonical message signed on the client path.
pub fn client_message(intent_id: &str, payment_id: &str) -> String {
    format!("{}|{}", intent_id, payment_id)
}

/// The two independent shared secrets
#[derive(Clone)]
pub struct SignatureKeys {
    client_secret: Vec<u8>,
    webhook_secret: Vec<u8>,
}

impl SignatureKeys {
    pub fn new(client_secret: impl Into<Vec<u8>>, webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            client_secret: client_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn verify_client(&self, intent_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hex(
            &self.client_secret,
            client_message(intent_id, payment_id).as_bytes(),
            signature,
        )
    }

    pub fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        verify_hex(&self.webhook_secret, payload, signature)
    }

    pub fn sign_client(&self, intent_id: &str, payment_id: &str) -> String {
        sign_hex(&self.client_secret, client_message(intent_id, payment_id).as_bytes())
    }

    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        sign_hex(&self.webhook_secret, payload)
    }
}

impl std::fmt::Debug for SignatureKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKeys")
            .field("client_secret", &"********")
            .field("webhook_secret", &"********")
            .finish()
    }
}
