// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const ENV_WATCHLIST_PATH: &str = "RISKWATCH_WATCHLIST_PATH";

/// Runtime settings read from environment variables (via `.env` in dev).
/// Missing API keys don't fail startup; the affected connector reports
/// `NotConfigured` at call time instead.
#[derive(Debug, Clone)]
pub struct Settings {
    pub newsapi_key: Option<String>,
    pub alpha_vantage_key: Option<String>,
    pub openweather_key: Option<String>,
    pub groq_api_key: Option<String>,
    /// Deterministic fixtures instead of network calls.
    pub dry_run: bool,
    /// Hard deadline for one pipeline run.
    pub run_deadline: Duration,
    /// Max concurrent classifier calls during triage.
    pub triage_fan_out: usize,
    pub retry: RetryPolicy,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            newsapi_key: non_empty_env("NEWSAPI_KEY"),
            alpha_vantage_key: non_empty_env("ALPHA_VANTAGE_KEY"),
            openweather_key: non_empty_env("OPENWEATHER_KEY"),
            groq_api_key: non_empty_env("GROQ_API_KEY"),
            dry_run: std::env::var("DRY_RUN").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false),
            run_deadline: Duration::from_secs(parsed_env("RUN_DEADLINE_SECS", 120)),
            triage_fan_out: parsed_env("TRIAGE_FAN_OUT", 4),
            retry: RetryPolicy::default(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Backoff parameters for the rate-limited client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay added/removed at random, e.g. 0.2 for ±20%.
    pub jitter: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            jitter: 0.2,
            max_delay_ms: 10_000,
        }
    }
}

/// One watched company. `key` doubles as the entity key everywhere in the
/// pipeline (summaries, dedup subjects, scheduler claims).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEntity {
    pub key: String,
    pub ticker: String,
    #[serde(default)]
    pub risk_keywords: Vec<String>,
    /// Lat/lon of the most exposed supply-chain node, for the weather feed.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

fn default_interval_secs() -> u64 {
    3600
}

#[derive(Deserialize)]
struct WatchlistFile {
    entities: Vec<WatchEntity>,
}

/// Load the watchlist from an explicit TOML path.
pub fn load_watchlist_from(path: &Path) -> Result<Vec<WatchEntity>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading watchlist from {}", path.display()))?;
    let parsed: WatchlistFile = toml::from_str(&content)
        .with_context(|| format!("parsing watchlist {}", path.display()))?;
    let mut out = Vec::with_capacity(parsed.entities.len());
    for e in parsed.entities {
        if e.key.trim().is_empty() {
            return Err(anyhow!("watchlist entry with empty key"));
        }
        out.push(e);
    }
    Ok(out)
}

/// Load the watchlist using env var + fallback:
/// 1) $RISKWATCH_WATCHLIST_PATH
/// 2) config/watchlist.toml
pub fn load_watchlist_default() -> Result<Vec<WatchEntity>> {
    if let Ok(p) = std::env::var(ENV_WATCHLIST_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_watchlist_from(&pb);
        }
        return Err(anyhow!("{ENV_WATCHLIST_PATH} points to non-existent path"));
    }
    let default = PathBuf::from("config/watchlist.toml");
    if default.exists() {
        return load_watchlist_from(&default);
    }
    Ok(Vec::new())
}
