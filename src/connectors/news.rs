// src/connectors/news.rs
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::WatchEntity;
use crate::error::CallError;
use crate::signal::{RawSignal, SourceKind};

use super::{check_status, map_http_error, remaining};

const NEWSAPI_URL: &str = "https://newsapi.org/v2/everything";
const MAX_HEADLINES: usize = 10;

/// Headline feed via NewsAPI. One `RawSignal` per article; the description
/// rides along in the text so triage sees more than the title.
pub struct NewsApiConnector {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct NewsResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Deserialize)]
struct Article {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

impl NewsApiConnector {
    pub fn new(api_key: String) -> Self {
        Self {
            http: default_http(),
            api_key,
        }
    }

    pub async fn fetch_headlines(
        &self,
        entity: &WatchEntity,
        deadline: Instant,
    ) -> Result<Vec<RawSignal>, CallError> {
        let mut query = format!("\"{}\"", entity.key);
        if !entity.risk_keywords.is_empty() {
            query.push_str(" AND (");
            query.push_str(&entity.risk_keywords.join(" OR "));
            query.push(')');
        }

        let resp = self
            .http
            .get(NEWSAPI_URL)
            .timeout(remaining(deadline))
            .query(&[
                ("q", query.as_str()),
                ("sortBy", "publishedAt"),
                ("language", "en"),
                ("pageSize", "10"),
            ])
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(map_http_error)?;
        let resp = check_status(resp)?;
        let body: NewsResponse = resp.json().await.map_err(map_http_error)?;

        let mut signals = Vec::new();
        for article in body.articles.into_iter().take(MAX_HEADLINES) {
            let title = article.title.unwrap_or_default();
            if title.trim().is_empty() {
                continue;
            }
            let text = match article.description {
                Some(d) if !d.trim().is_empty() => format!("{title} - {d}"),
                _ => title,
            };
            signals.push(RawSignal::new(
                SourceKind::News,
                &entity.key,
                text,
                article.url,
            ));
        }
        tracing::debug!(entity = %entity.key, count = signals.len(), "news fetched");
        Ok(signals)
    }
}

pub(crate) fn default_http() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("riskwatch/0.1")
        .connect_timeout(std::time::Duration::from_secs(4))
        .build()
        .expect("reqwest client")
}
