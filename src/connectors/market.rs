// src/connectors/market.rs
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::WatchEntity;
use crate::error::CallError;
use crate::signal::{RawSignal, SourceKind};

use super::{check_status, map_http_error, remaining};

const AV_BASE: &str = "https://www.alphavantage.co/query";
const VOLATILITY_HIGH_PCT: f64 = 3.0;

/// Daily quote from Alpha Vantage, rendered as one auxiliary signal:
/// ticker, percent change, and a coarse volatility label the reasoner can
/// correlate with the news.
pub struct AlphaVantageConnector {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize, Default)]
struct QuoteResponse {
    #[serde(rename = "Global Quote", default)]
    quote: Option<GlobalQuote>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

impl AlphaVantageConnector {
    pub fn new(api_key: String) -> Self {
        Self {
            http: super::news::default_http(),
            api_key,
        }
    }

    pub async fn fetch_quote(
        &self,
        entity: &WatchEntity,
        deadline: Instant,
    ) -> Result<RawSignal, CallError> {
        let resp = self
            .http
            .get(AV_BASE)
            .timeout(remaining(deadline))
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", entity.ticker.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(map_http_error)?;
        let resp = check_status(resp)?;
        let body: QuoteResponse = resp.json().await.map_err(map_http_error)?;

        let quote = body
            .quote
            .ok_or_else(|| CallError::Unavailable("empty quote".into()))?;
        let price: f64 = quote
            .price
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0.0);
        let change_pct: f64 = quote
            .change_percent
            .as_deref()
            .map(|c| c.trim_end_matches('%'))
            .and_then(|c| c.parse().ok())
            .unwrap_or(0.0);
        let label = if change_pct.abs() > VOLATILITY_HIGH_PCT {
            "high"
        } else {
            "normal"
        };

        tracing::debug!(ticker = %entity.ticker, price, change_pct, "quote fetched");
        Ok(RawSignal::new(
            SourceKind::Market,
            &entity.key,
            format!(
                "{} {:+.2}% at {:.2} (volatility {})",
                entity.ticker, change_pct, price, label
            ),
            None,
        ))
    }
}
