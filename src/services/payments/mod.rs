pub mod razorpay;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    #[serde(rename = "amount")]
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub order_id: Option<String>,
    #[serde(rename = "amount")]
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub method: Option<String>,
}

impl GatewayPayment {
    pub fn is_settled(&self) -> bool {
        matches!(self.status.as_str(), "captured" | "authorized")
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> anyhow::Result<GatewayOrder>;

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    async fn fetch_payment(&self, payment_id: &str) -> anyhow::Result<GatewayPayment>;

    async fn refund(&self, payment_id: &str, amount_minor: i64) -> anyhow::Result<String>;
}

// Constant-time check of a hex HMAC-SHA256 over `data`.
pub fn hmac_sha256_hex_matches(secret: &str, data: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}

pub fn hmac_sha256_hex(secret: &str, data: &[u8]) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
