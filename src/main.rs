//! Riskwatch daemon entrypoint. Boots tracing and metrics, loads the
//! watchlist, starts one scheduled pipeline per entity, and serves the admin
//! and metrics routers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use riskwatch::client::RateLimitedClient;
use riskwatch::config::{self, Settings};
use riskwatch::connectors::llm::{DryRunClassifier, DryRunReasoner, GroqClassifier, GroqReasoner};
use riskwatch::connectors::LiveConnector;
use riskwatch::correlate::{CorrelationStage, Reasoner};
use riskwatch::dedup::MemoryDedup;
use riskwatch::notify::NotifierMux;
use riskwatch::persist::JsonlEventSink;
use riskwatch::pipeline::Pipeline;
use riskwatch::scheduler::{MonitorEvent, Scheduler};
use riskwatch::status::StatusWriter;
use riskwatch::triage::{Classifier, TriageStage};
use riskwatch::{api, metrics};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("riskwatch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    let watchlist = config::load_watchlist_default().context("loading watchlist")?;
    if watchlist.is_empty() {
        tracing::warn!("watchlist is empty; subscribe via the admin API");
    }

    let metrics = metrics::Metrics::init();

    // Classifier and reasoner fall back to deterministic stand-ins when no
    // key is configured, same as dry-run mode.
    let (classifier, reasoner): (Arc<dyn Classifier>, Arc<dyn Reasoner>) =
        match (&settings.groq_api_key, settings.dry_run) {
            (Some(key), false) => (
                Arc::new(GroqClassifier::new(key.clone())),
                Arc::new(GroqReasoner::new(key.clone())),
            ),
            _ => {
                tracing::info!("LLM calls disabled (dry run or no GROQ_API_KEY)");
                (Arc::new(DryRunClassifier), Arc::new(DryRunReasoner))
            }
        };

    // Per-service budgets. Groq free tier allows 30 requests/minute, so the
    // classifier and reasoner refill at 0.5 tokens/sec.
    let fetch_client = Arc::new(RateLimitedClient::new("sources", 10.0, 1.0, settings.retry));
    let triage_client = Arc::new(RateLimitedClient::new("classifier", 5.0, 0.5, settings.retry));
    let reasoner_client = Arc::new(RateLimitedClient::new("reasoner", 5.0, 0.5, settings.retry));

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(LiveConnector::from_settings(&settings)),
        fetch_client,
        TriageStage::new(classifier, triage_client, settings.triage_fan_out),
        CorrelationStage::new(reasoner, reasoner_client),
        Arc::new(MemoryDedup::new()),
        Arc::new(JsonlEventSink::new("data/events.jsonl")),
        Arc::new(NotifierMux::from_env()),
        settings.run_deadline,
    ));

    let scheduler = Scheduler::new(pipeline);
    for entity in &watchlist {
        let interval = Duration::from_secs(entity.interval_secs.max(1));
        scheduler.subscribe(entity.clone(), interval);
    }

    spawn_status_writer(scheduler.clone());

    let state = api::AppState {
        scheduler: scheduler.clone(),
    };
    let router = api::create_router(state).merge(metrics.router());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!(port, entities = watchlist.len(), "riskwatch up");

    axum::serve(listener, router).await.context("server")?;
    Ok(())
}

/// Mirror the monitor event stream into the status file for the dashboard.
fn spawn_status_writer(scheduler: Scheduler) {
    let writer = StatusWriter::new("state/monitor_status.json");
    let mut events = scheduler.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MonitorEvent::RunFinished(summary)) => {
                    let subs = scheduler.list_subscriptions();
                    writer.write("idle", &subs, Some(&summary), None).await;
                }
                Ok(MonitorEvent::SkippedOverlap { entity_key, .. }) => {
                    tracing::debug!(entity = %entity_key, "overlap skip observed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "status writer lagged behind event stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
