// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and register series descriptions.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        describe_all();
        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time registration so all series show up on /metrics with help text.
fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs started.");
        describe_counter!("pipeline_runs_completed_total", "Runs that reached Completed.");
        describe_counter!("pipeline_runs_failed_total", "Runs that ended in Failed.");
        describe_counter!("pipeline_run_timeouts_total", "Runs aborted by the run deadline.");
        describe_counter!("pipeline_source_errors_total", "Per-source fetch failures.");
        describe_counter!("pipeline_events_total", "Risk events persisted, by severity.");
        describe_counter!("pipeline_duplicates_total", "Events rejected by dedup.");
        describe_counter!("triage_items_total", "Items triaged.");
        describe_counter!("triage_relevant_total", "Items triage marked relevant.");
        describe_counter!("triage_item_errors_total", "Per-item classifier failures.");
        describe_counter!("correlate_events_total", "Events produced by correlation.");
        describe_counter!("correlate_malformed_total", "Malformed reasoner responses.");
        describe_counter!("correlate_batch_failures_total", "Correlation batches failed.");
        describe_counter!("scheduler_runs_started_total", "Runs started by the scheduler.");
        describe_counter!(
            "scheduler_skipped_overlaps_total",
            "Timer fires skipped because a run was in flight."
        );
        describe_counter!("outbound_calls_total", "Outbound call attempts, by service/outcome.");
        describe_counter!("outbound_rate_limited_total", "Calls rejected by the local budget.");
        describe_counter!("outbound_retries_exhausted_total", "Calls that ran out of attempts.");
        describe_counter!("alerts_sent_total", "Alert dispatches, by channel.");
        describe_counter!("alerts_failed_total", "Failed alert dispatches, by channel.");
        describe_histogram!("outbound_call_ms", "Outbound call latency in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts of the last pipeline run.");
    });
}
