// src/signal.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which upstream a signal came from. News goes through triage; market and
/// weather are auxiliary and join correlation directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    News,
    Market,
    Weather,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::News, SourceKind::Market, SourceKind::Weather];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::News => "news",
            SourceKind::Market => "market",
            SourceKind::Weather => "weather",
        }
    }
}

/// One raw item fetched from an upstream. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawSignal {
    pub source: SourceKind,
    pub entity_key: String,
    pub fetched_at: DateTime<Utc>,
    /// Headline or summary text, normalized.
    pub text: String,
    pub url: Option<String>,
    /// Stable key hashed for dedup, e.g. the normalized headline.
    pub content_key: String,
}

impl RawSignal {
    pub fn new(
        source: SourceKind,
        entity_key: impl Into<String>,
        text: impl Into<String>,
        url: Option<String>,
    ) -> Self {
        let text = normalize_text(&text.into());
        Self {
            source,
            entity_key: entity_key.into(),
            fetched_at: Utc::now(),
            content_key: text.clone(),
            text,
            url,
        }
    }
}

/// Outcome of triaging one signal. Consumed once by correlation.
#[derive(Debug, Clone)]
pub struct TriageVerdict {
    pub signal: RawSignal,
    pub relevant: bool,
    pub latency_ms: u64,
}

/// Normalize text: decode HTML entities, strip tags, collapse whitespace,
/// trim, cap length. Dedup hashes are computed over this form (case-folded
/// by the hasher).
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}
