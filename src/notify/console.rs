// src/notify/console.rs
use anyhow::Result;

use super::Notifier;
use crate::event::RiskEvent;

/// Structured log line; the operator's log stream is the channel.
pub struct ConsoleNotifier;

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, event: &RiskEvent) -> Result<()> {
        tracing::warn!(
            entity = %event.entity_key,
            severity = ?event.severity,
            headline = %event.headline,
            impact = %event.impact_estimate,
            "RISK ALERT"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "console"
    }
}
