// End-to-end pipeline runs against scripted collaborators: degradation on
// partial upstream failure, hard failure modes, dedup across runs, and the
// persist rollback path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use riskwatch::dedup::DedupStore;
use riskwatch::error::{FailureKind, Stage};
use riskwatch::event::Severity;
use riskwatch::persist::MemoryEventSink;
use riskwatch::pipeline::{FailCause, RunState};

use common::{build_pipeline, entity, pipeline_with, BrokenSink, SourceScript, StalledSink, StubConnector};

const DEADLINE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn healthy_run_persists_relevant_events() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme supplier announces production halt",
        "Acme quarterly earnings preview",
    ]));
    let h = build_pipeline(connector, DEADLINE);

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.items_fetched, 4); // 2 news + market + weather
    assert_eq!(summary.items_triaged, 1);
    assert_eq!(summary.events_accepted, 1);
    assert!(summary.errors.is_empty());
    assert_eq!(
        summary.stages_completed,
        vec![Stage::Fetch, Stage::Triage, Stage::Correlate, Stage::Dedupe, Stage::Persist]
    );

    let events = h.sink.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Red);
    assert_eq!(events[0].entity_key, "Acme");
    // News plus both auxiliary signals fed the assessment.
    assert_eq!(events[0].source_signals.len(), 3);
}

#[tokio::test]
async fn aux_source_failure_degrades_but_completes() {
    let connector = Arc::new(StubConnector {
        news: SourceScript::Items(vec!["Acme plant halt after fire"]),
        market: SourceScript::Down,
        weather: SourceScript::Items(vec!["Clear (severity: calm)"]),
    });
    let h = build_pipeline(connector, DEADLINE);

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.events_accepted, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].stage, Stage::Fetch);
    assert_eq!(summary.errors[0].kind, FailureKind::PartialUpstream);
    assert_eq!(summary.errors[0].subject, "market");
    // Event still forms from news + weather alone.
    assert_eq!(h.sink.snapshot()[0].source_signals.len(), 2);
}

#[tokio::test]
async fn all_sources_down_fails_the_fetch_stage() {
    let connector = Arc::new(StubConnector {
        news: SourceScript::Down,
        market: SourceScript::Down,
        weather: SourceScript::Down,
    });
    let h = build_pipeline(connector, DEADLINE);

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Failed(FailCause::Stage(Stage::Fetch)));
    assert_eq!(summary.errors.len(), 3);
    assert!(summary.stages_completed.is_empty());
    assert!(h.sink.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_deadline_aborts_a_stuck_fetch() {
    let connector = Arc::new(StubConnector {
        news: SourceScript::Hang(Duration::from_secs(600)),
        market: SourceScript::Hang(Duration::from_secs(600)),
        weather: SourceScript::Hang(Duration::from_secs(600)),
    });
    let h = build_pipeline(connector, Duration::from_secs(1));

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Failed(FailCause::Timeout));
    assert_eq!(summary.events_accepted, 0);
}

#[tokio::test]
async fn classifier_failure_on_one_item_does_not_sink_the_rest() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme production halt announced",
        "Acme adopts poison pill defense",
        "Acme opens flagship store",
    ]));
    let h = build_pipeline(connector, DEADLINE);

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Completed);
    // The failed item degrades to not-relevant and is recorded, nothing more.
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].stage, Stage::Triage);
    assert_eq!(summary.items_triaged, 1);
    assert_eq!(summary.events_accepted, 1);
}

#[tokio::test]
async fn nothing_relevant_is_a_valid_outcome() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme sponsors local marathon",
        "Acme CEO interviewed",
    ]));
    let h = build_pipeline(connector, DEADLINE);

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.items_triaged, 0);
    assert_eq!(summary.items_correlated, 0);
    assert!(h.sink.snapshot().is_empty());
}

#[tokio::test]
async fn repeated_headline_is_skipped_on_the_second_run() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme supplier halt persists into second week",
    ]));
    let h = build_pipeline(connector, DEADLINE);
    let acme = entity("Acme");

    let first = h.pipeline.run(&acme).await;
    assert_eq!(first.events_accepted, 1);
    assert_eq!(first.duplicates_skipped, 0);

    let second = h.pipeline.run(&acme).await;
    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.events_accepted, 0);
    assert_eq!(second.duplicates_skipped, 1);

    assert_eq!(h.sink.snapshot().len(), 1);
}

#[tokio::test]
async fn failed_persist_leaves_no_admission_so_a_retry_can_succeed() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme logistics halt at main port",
    ]));
    let dedup = Arc::new(riskwatch::dedup::MemoryDedup::new());
    let acme = entity("Acme");

    let broken = pipeline_with(
        connector.clone(),
        Arc::clone(&dedup),
        Arc::new(BrokenSink),
        DEADLINE,
    );
    let summary = broken.run(&acme).await;
    assert_eq!(summary.state, RunState::Failed(FailCause::Stage(Stage::Persist)));
    assert_eq!(summary.errors.last().map(|e| e.kind), Some(FailureKind::Storage));
    // Nothing was admitted for the failed save, so the event stays retryable.
    assert_eq!(dedup.len(), 0);

    let sink = Arc::new(MemoryEventSink::new());
    let healthy = pipeline_with(connector, dedup, sink.clone(), DEADLINE);
    let retry = healthy.run(&acme).await;
    assert_eq!(retry.state, RunState::Completed);
    assert_eq!(retry.events_accepted, 1);
    assert_eq!(retry.duplicates_skipped, 0);
    assert_eq!(sink.snapshot().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_during_persist_leaves_the_event_retryable() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme assembly halt at plant two",
    ]));
    let dedup = Arc::new(riskwatch::dedup::MemoryDedup::new());
    let acme = entity("Acme");

    // The write outlives the run deadline, so the run is cut off mid-persist.
    let stalled = pipeline_with(
        connector.clone(),
        Arc::clone(&dedup),
        Arc::new(StalledSink),
        Duration::from_millis(500),
    );
    let summary = stalled.run(&acme).await;
    assert_eq!(summary.state, RunState::Failed(FailCause::Timeout));
    // The save never completed, so the hash must not be remembered as seen.
    assert_eq!(dedup.len(), 0);

    let sink = Arc::new(MemoryEventSink::new());
    let healthy = pipeline_with(connector, dedup, sink.clone(), DEADLINE);
    let retry = healthy.run(&acme).await;
    assert_eq!(retry.state, RunState::Completed);
    assert_eq!(retry.events_accepted, 1);
    assert_eq!(retry.duplicates_skipped, 0);
    assert_eq!(sink.snapshot().len(), 1);
}

#[tokio::test]
async fn identical_headlines_within_one_run_collapse_to_one_event() {
    let connector = Arc::new(StubConnector::healthy(vec![
        "Acme production halt confirmed",
        "Acme production halt confirmed",
    ]));
    let h = build_pipeline(connector, DEADLINE);

    let summary = h.pipeline.run(&entity("Acme")).await;

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.events_accepted, 1);
    assert_eq!(summary.duplicates_skipped, 1);
    assert_eq!(h.sink.snapshot().len(), 1);
}
