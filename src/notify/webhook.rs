// src/notify/webhook.rs
use anyhow::{Context, Result};
use reqwest::Client;

use super::Notifier;
use crate::event::RiskEvent;

/// Slack-compatible incoming webhook.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: &RiskEvent) -> Result<()> {
        let text = format!(
            "*Risk alert:* {:?} for {}\n{}\nImpact: {}\nMitigations: {}",
            event.severity,
            event.entity_key,
            event.headline,
            event.impact_estimate,
            event.mitigations.join("; "),
        );
        let body = serde_json::json!({ "text": text });

        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("webhook post")?
            .error_for_status()
            .context("webhook non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
