// src/status.rs
// Small JSON status file the external dashboard polls, so it can show live
// monitoring state without coupling to this process.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::RunSummary;
use crate::scheduler::Subscription;

#[derive(Serialize)]
struct StatusPayload<'a> {
    state: &'a str,
    watchlist: Vec<&'a str>,
    subscriptions: &'a [Subscription],
    last_run: Option<&'a RunSummary>,
    error: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

pub struct StatusWriter {
    path: PathBuf,
}

impl StatusWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Best-effort atomic write (tmp + rename). Failures are logged, never
    /// propagated: status is observability, not state.
    pub async fn write(
        &self,
        state: &str,
        subscriptions: &[Subscription],
        last_run: Option<&RunSummary>,
        error: Option<&str>,
    ) {
        let payload = StatusPayload {
            state,
            watchlist: subscriptions.iter().map(|s| s.entity_key.as_str()).collect(),
            subscriptions,
            last_run,
            error,
            updated_at: Utc::now(),
        };
        let json = match serde_json::to_vec_pretty(&payload) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("status encode: {e:#}");
                return;
            }
        };

        if let Some(dir) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!("status dir: {e:#}");
                return;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp, &json).await {
            tracing::warn!("status write: {e:#}");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            tracing::warn!("status rename: {e:#}");
        }
    }
}
