// src/connectors/mod.rs
pub mod llm;
pub mod market;
pub mod news;
pub mod weather;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::config::{Settings, WatchEntity};
use crate::error::CallError;
use crate::signal::{RawSignal, SourceKind};

/// Ingestion boundary. News yields one signal per headline; market and
/// weather yield at most one auxiliary signal per run.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn fetch(
        &self,
        entity: &WatchEntity,
        kind: SourceKind,
        deadline: Instant,
    ) -> Result<Vec<RawSignal>, CallError>;
}

/// Production connector: dispatches each source kind to its upstream, or to
/// deterministic fixtures in dry-run mode.
pub struct LiveConnector {
    news: Option<news::NewsApiConnector>,
    market: Option<market::AlphaVantageConnector>,
    weather: Option<weather::OpenWeatherConnector>,
    dry_run: bool,
}

impl LiveConnector {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            news: settings
                .newsapi_key
                .clone()
                .map(news::NewsApiConnector::new),
            market: settings
                .alpha_vantage_key
                .clone()
                .map(market::AlphaVantageConnector::new),
            weather: settings
                .openweather_key
                .clone()
                .map(weather::OpenWeatherConnector::new),
            dry_run: settings.dry_run,
        }
    }
}

#[async_trait]
impl SourceConnector for LiveConnector {
    async fn fetch(
        &self,
        entity: &WatchEntity,
        kind: SourceKind,
        deadline: Instant,
    ) -> Result<Vec<RawSignal>, CallError> {
        if self.dry_run {
            return Ok(fixture_signals(entity, kind));
        }
        match kind {
            SourceKind::News => {
                let c = self.news.as_ref().ok_or(CallError::NotConfigured("NEWSAPI_KEY"))?;
                c.fetch_headlines(entity, deadline).await
            }
            SourceKind::Market => {
                let c = self
                    .market
                    .as_ref()
                    .ok_or(CallError::NotConfigured("ALPHA_VANTAGE_KEY"))?;
                Ok(vec![c.fetch_quote(entity, deadline).await?])
            }
            SourceKind::Weather => {
                let c = self
                    .weather
                    .as_ref()
                    .ok_or(CallError::NotConfigured("OPENWEATHER_KEY"))?;
                let Some(location) = entity.location else {
                    // No supply-chain node configured; not an error.
                    return Ok(Vec::new());
                };
                Ok(vec![c.fetch_conditions(entity, location, deadline).await?])
            }
        }
    }
}

/// Deterministic signals for dry runs and demos, keyed off the entity so
/// repeated runs exercise the dedup path.
pub fn fixture_signals(entity: &WatchEntity, kind: SourceKind) -> Vec<RawSignal> {
    match kind {
        SourceKind::News => vec![
            RawSignal::new(
                SourceKind::News,
                &entity.key,
                format!("{} supplier reports production halt after factory incident", entity.key),
                Some("https://example.com/fixture-1".into()),
            ),
            RawSignal::new(
                SourceKind::News,
                &entity.key,
                format!("{} quarterly earnings preview", entity.key),
                Some("https://example.com/fixture-2".into()),
            ),
        ],
        SourceKind::Market => vec![RawSignal::new(
            SourceKind::Market,
            &entity.key,
            format!("{} -2.10% (volatility normal) {}", entity.ticker, Utc::now().date_naive()),
            None,
        )],
        SourceKind::Weather => vec![RawSignal::new(
            SourceKind::Weather,
            &entity.key,
            "Heavy rain, gusts to 80 km/h (severity: severe)",
            None,
        )],
    }
}

/// Shared mapping from reqwest failures to the call-error taxonomy.
pub(crate) fn map_http_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        return CallError::Timeout;
    }
    if let Some(status) = e.status() {
        if status.as_u16() == 429 {
            return CallError::RateLimited;
        }
    }
    CallError::Unavailable(e.to_string())
}

/// Check a response status before parsing the body.
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, CallError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(CallError::RateLimited);
    }
    if !status.is_success() {
        return Err(CallError::Unavailable(format!("HTTP {status}")));
    }
    Ok(resp)
}

/// Remaining wall-clock budget for one HTTP request.
pub(crate) fn remaining(deadline: Instant) -> std::time::Duration {
    deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(std::time::Duration::from_millis(1))
}
