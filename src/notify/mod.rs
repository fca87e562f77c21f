// src/notify/mod.rs
// Outbound alerting for red-severity events. Channels are best-effort:
// a failed send is logged and never fails the pipeline run.

pub mod console;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;

use crate::event::RiskEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &RiskEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fan-out over every configured channel.
#[derive(Default)]
pub struct NotifierMux {
    channels: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    /// Console always; webhook when RISKWATCH_WEBHOOK_URL is set.
    pub fn from_env() -> Self {
        let mut channels: Vec<Box<dyn Notifier>> = vec![Box::new(console::ConsoleNotifier)];
        if let Ok(url) = std::env::var("RISKWATCH_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                channels.push(Box::new(webhook::WebhookNotifier::new(url)));
            }
        }
        Self { channels }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub async fn dispatch(&self, event: &RiskEvent) {
        for ch in &self.channels {
            match ch.send(event).await {
                Ok(()) => {
                    metrics::counter!("alerts_sent_total", "channel" => ch.name()).increment(1);
                }
                Err(e) => {
                    metrics::counter!("alerts_failed_total", "channel" => ch.name()).increment(1);
                    tracing::warn!(channel = ch.name(), error = %e, "alert dispatch failed");
                }
            }
        }
    }
}
