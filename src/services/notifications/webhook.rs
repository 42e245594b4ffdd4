use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::Notifier;

// Hands messages to the marketplace's mail/SMS relay, which resolves the
// recipient id to an address.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({
                "recipient": recipient,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .context("failed to reach notification relay")?
            .error_for_status()
            .context("notification relay returned error")?;

        Ok(())
    }
}
