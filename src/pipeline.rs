// src/pipeline.rs
// One full pass for one entity: fetch -> triage -> correlate -> dedupe ->
// persist. Stage order is fixed; work inside fetch and triage is parallel.
// Partial upstream failures degrade the run, total stage failures abort it,
// and the whole pass runs under a hard deadline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use crate::client::RateLimitedClient;
use crate::config::WatchEntity;
use crate::connectors::SourceConnector;
use crate::correlate::CorrelationStage;
use crate::dedup::DedupStore;
use crate::error::{CallError, FailureKind, Stage, StageError};
use crate::event::{RiskEvent, Severity};
use crate::notify::NotifierMux;
use crate::persist::EventSink;
use crate::signal::{RawSignal, SourceKind};
use crate::triage::TriageStage;

/// State machine for one run. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Triaging,
    Correlating,
    Deduplicating,
    Persisting,
    Completed,
    Failed(FailCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailCause {
    Stage(Stage),
    Timeout,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed(_))
    }
}

/// What one run did. Exactly one is emitted per terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub entity_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub stages_completed: Vec<Stage>,
    pub items_fetched: usize,
    pub items_triaged: usize,
    pub items_correlated: usize,
    pub events_accepted: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<StageError>,
}

impl RunSummary {
    fn started(entity_key: &str) -> Self {
        Self {
            entity_key: entity_key.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            state: RunState::Idle,
            stages_completed: Vec::new(),
            items_fetched: 0,
            items_triaged: 0,
            items_correlated: 0,
            events_accepted: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
        }
    }
}

/// Shared, reusable pipeline. `run` executes one pass; the scheduler may run
/// many passes concurrently for different entities.
pub struct Pipeline {
    connector: Arc<dyn SourceConnector>,
    fetch_client: Arc<RateLimitedClient>,
    triage: TriageStage,
    correlation: CorrelationStage,
    dedup: Arc<dyn DedupStore>,
    sink: Arc<dyn EventSink>,
    notifier: Arc<NotifierMux>,
    run_deadline: Duration,
    /// The in-memory dedup store starts cold after a restart; when set, a
    /// hash it does not know is double-checked against the sink before
    /// persisting.
    durable_fallback: bool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        fetch_client: Arc<RateLimitedClient>,
        triage: TriageStage,
        correlation: CorrelationStage,
        dedup: Arc<dyn DedupStore>,
        sink: Arc<dyn EventSink>,
        notifier: Arc<NotifierMux>,
        run_deadline: Duration,
    ) -> Self {
        Self {
            connector,
            fetch_client,
            triage,
            correlation,
            dedup,
            sink,
            notifier,
            run_deadline,
            durable_fallback: true,
        }
    }

    pub fn without_durable_fallback(mut self) -> Self {
        self.durable_fallback = false;
        self
    }

    /// Execute one run for `entity` and return its summary. Never panics the
    /// caller; every failure mode ends in a terminal summary.
    pub async fn run(&self, entity: &WatchEntity) -> RunSummary {
        let deadline = Instant::now() + self.run_deadline;
        let mut summary = RunSummary::started(&entity.key);
        let current = Arc::new(Mutex::new(RunState::Idle));

        counter!("pipeline_runs_total").increment(1);
        tracing::info!(entity = %entity.key, "pipeline run starting");

        let state = {
            let tracker = Arc::clone(&current);
            match timeout_at(deadline, self.execute(entity, deadline, &mut summary, tracker)).await
            {
                Ok(state) => state,
                Err(_) => {
                    let stuck = *current.lock().expect("run state mutex poisoned");
                    tracing::warn!(entity = %entity.key, state = ?stuck, "run deadline exceeded");
                    counter!("pipeline_run_timeouts_total").increment(1);
                    RunState::Failed(FailCause::Timeout)
                }
            }
        };

        summary.state = state;
        summary.finished_at = Utc::now();
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        match state {
            RunState::Completed => {
                counter!("pipeline_runs_completed_total").increment(1);
                tracing::info!(
                    entity = %entity.key,
                    fetched = summary.items_fetched,
                    relevant = summary.items_triaged,
                    events = summary.events_accepted,
                    duplicates = summary.duplicates_skipped,
                    errors = summary.errors.len(),
                    "pipeline run completed"
                );
            }
            RunState::Failed(cause) => {
                counter!("pipeline_runs_failed_total").increment(1);
                tracing::warn!(entity = %entity.key, ?cause, "pipeline run failed");
            }
            _ => unreachable!("execute returns a terminal state"),
        }
        summary
    }

    async fn execute(
        &self,
        entity: &WatchEntity,
        deadline: Instant,
        summary: &mut RunSummary,
        current: Arc<Mutex<RunState>>,
    ) -> RunState {
        let advance = |state: RunState| {
            *current.lock().expect("run state mutex poisoned") = state;
            tracing::debug!(entity = %entity.key, ?state, "stage transition");
        };

        // --- Fetching: all sources in parallel, independent failures ---
        advance(RunState::Fetching);
        let (news, market, weather) = self.fetch_all(entity, deadline, summary).await;
        if Instant::now() >= deadline {
            return RunState::Failed(FailCause::Timeout);
        }
        summary.items_fetched = news.len() + market.len() + weather.len();
        if summary.items_fetched == 0 && summary.errors.len() == SourceKind::ALL.len() {
            return RunState::Failed(FailCause::Stage(Stage::Fetch));
        }
        summary.stages_completed.push(Stage::Fetch);

        // --- Triaging: news only; market/weather join correlation directly ---
        advance(RunState::Triaging);
        let news_count = news.len();
        let (verdicts, triage_errors) = self.triage.filter(news, deadline).await;
        if Instant::now() >= deadline {
            return RunState::Failed(FailCause::Timeout);
        }
        let all_failed = news_count > 0 && triage_errors.len() >= news_count;
        summary.errors.extend(triage_errors);
        if all_failed {
            return RunState::Failed(FailCause::Stage(Stage::Triage));
        }
        let relevant: Vec<RawSignal> = verdicts
            .into_iter()
            .filter(|v| v.relevant)
            .map(|v| v.signal)
            .collect();
        summary.items_triaged = relevant.len();
        summary.stages_completed.push(Stage::Triage);

        // --- Correlating: batched, sequential per entity ---
        advance(RunState::Correlating);
        let events = if relevant.is_empty() {
            Vec::new()
        } else {
            match self
                .correlation
                .assess(
                    &entity.key,
                    &relevant,
                    market.first(),
                    weather.first(),
                    deadline,
                )
                .await
            {
                Ok((events, integrity_errors)) => {
                    summary.errors.extend(integrity_errors);
                    events
                }
                Err(batch_error) => {
                    summary.errors.push(batch_error);
                    return RunState::Failed(FailCause::Stage(Stage::Correlate));
                }
            }
        };
        if Instant::now() >= deadline {
            return RunState::Failed(FailCause::Timeout);
        }
        summary.items_correlated = events.len();
        summary.stages_completed.push(Stage::Correlate);

        // --- Deduplicating + Persisting: save first, admit only after the
        // save completed. A run cut short anywhere in between leaves no
        // admission behind, so the event stays retryable; the sink existence
        // check catches an already-persisted copy on the next run.
        advance(RunState::Deduplicating);
        let mut fresh: Vec<RiskEvent> = Vec::new();
        for event in events {
            if self.dedup.contains(&event.id) || fresh.iter().any(|f| f.id == event.id) {
                summary.duplicates_skipped += 1;
                counter!("pipeline_duplicates_total").increment(1);
                continue;
            }
            if self.durable_fallback {
                match self.sink.exists(&event.id).await {
                    Ok(true) => {
                        summary.duplicates_skipped += 1;
                        counter!("pipeline_duplicates_total").increment(1);
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "durable dedup check failed; trusting memory");
                    }
                }
            }
            fresh.push(event);
        }
        summary.stages_completed.push(Stage::Dedupe);

        advance(RunState::Persisting);
        for event in &fresh {
            if let Err(e) = self.sink.save(event).await {
                summary.errors.push(StageError {
                    stage: Stage::Persist,
                    kind: FailureKind::Storage,
                    subject: event.id.clone(),
                    detail: e.to_string(),
                });
                return RunState::Failed(FailCause::Stage(Stage::Persist));
            }
            self.dedup.admit(&event.id);
            summary.events_accepted += 1;
            counter!("pipeline_events_total", "severity" => severity_tag(event.severity))
                .increment(1);

            if event.severity == Severity::Red {
                // Fire-and-forget; notification failure never fails the run.
                self.notifier.dispatch(event).await;
            }
        }
        summary.stages_completed.push(Stage::Persist);

        RunState::Completed
    }

    /// Fetch all three sources concurrently. Per-source failures become
    /// partial-upstream errors; the run proceeds with what arrived.
    async fn fetch_all(
        &self,
        entity: &WatchEntity,
        deadline: Instant,
        summary: &mut RunSummary,
    ) -> (Vec<RawSignal>, Vec<RawSignal>, Vec<RawSignal>) {
        let fetch_kind = |kind: SourceKind| {
            let connector = Arc::clone(&self.connector);
            let client = Arc::clone(&self.fetch_client);
            async move {
                client
                    .call(deadline, || connector.fetch(entity, kind, deadline))
                    .await
            }
        };

        let (news, market, weather) = tokio::join!(
            fetch_kind(SourceKind::News),
            fetch_kind(SourceKind::Market),
            fetch_kind(SourceKind::Weather),
        );

        let mut unpack = |kind: SourceKind, result: Result<Vec<RawSignal>, CallError>| match result {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!(entity = %entity.key, source = kind.as_str(), error = %e, "source fetch failed");
                counter!("pipeline_source_errors_total", "source" => kind.as_str()).increment(1);
                summary
                    .errors
                    .push(StageError::partial(Stage::Fetch, kind.as_str(), e.to_string()));
                Vec::new()
            }
        };

        (
            unpack(SourceKind::News, news),
            unpack(SourceKind::Market, market),
            unpack(SourceKind::Weather, weather),
        )
    }
}

fn severity_tag(sev: Severity) -> &'static str {
    match sev {
        Severity::Green => "green",
        Severity::Yellow => "yellow",
        Severity::Red => "red",
    }
}
