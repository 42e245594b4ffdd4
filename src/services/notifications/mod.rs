pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(recipient, subject, body, "notification (log only)");
        Ok(())
    }
}

pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    timeout: Duration,
    recipient: &str,
    subject: &str,
    body: &str,
) -> bool {
    match tokio::time::timeout(timeout, notifier.send(recipient, subject, body)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, recipient, subject, "failed to send notification");
            false
        }
        Err(_) => {
            tracing::warn!(recipient, subject, ?timeout, "notification timed out");
            false
        }
    }
}
