use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{hmac_sha256_hex_matches, GatewayOrder, GatewayPayment, PaymentGateway};

const API_BASE: &str = "https://api.razorpay.com/v1";

pub struct RazorpayGateway {
    key_id: String,
    key_secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String) -> Self {
        Self::with_base_url(key_id, key_secret, API_BASE.to_string())
    }

    pub fn with_base_url(key_id: String, key_secret: String, base_url: String) -> Self {
        Self {
            key_id,
            key_secret,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> anyhow::Result<T> {
        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse Razorpay {what} response"))?;

        if !status.is_success() {
            anyhow::bail!("Razorpay API error ({}): {}", status, data["error"]);
        }

        serde_json::from_value(data).with_context(|| format!("unexpected Razorpay {what} shape"))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> anyhow::Result<GatewayOrder> {
        let resp = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({
                "amount": amount_minor,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await
            .context("failed to call Razorpay orders API")?;

        Self::read(resp, "order").await
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        let payload = format!("{order_id}|{payment_id}");
        hmac_sha256_hex_matches(&self.key_secret, payload.as_bytes(), signature)
    }

    async fn fetch_payment(&self, payment_id: &str) -> anyhow::Result<GatewayPayment> {
        let resp = self
            .client
            .get(format!("{}/payments/{payment_id}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .context("failed to call Razorpay payments API")?;

        Self::read(resp, "payment").await
    }

    async fn refund(&self, payment_id: &str, amount_minor: i64) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/payments/{payment_id}/refund", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({ "amount": amount_minor }))
            .send()
            .await
            .context("failed to call Razorpay refund API")?;

        let data: serde_json::Value = Self::read(resp, "refund").await?;
        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing id in Razorpay refund response"))
    }
}
