// Shared fakes and builders for integration tests. Everything here is
// deterministic; no network, no clocks beyond tokio's.

// Each test binary compiles its own copy and uses a different subset.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use riskwatch::client::RateLimitedClient;
use riskwatch::config::{RetryPolicy, WatchEntity};
use riskwatch::connectors::SourceConnector;
use riskwatch::correlate::{CorrelationRequest, CorrelationStage, Reasoner};
use riskwatch::dedup::MemoryDedup;
use riskwatch::error::{CallError, SinkError};
use riskwatch::event::{Assessment, RiskEvent};
use riskwatch::notify::NotifierMux;
use riskwatch::persist::{EventSink, MemoryEventSink};
use riskwatch::pipeline::Pipeline;
use riskwatch::signal::{RawSignal, SourceKind};
use riskwatch::triage::{Classifier, TriageStage};

pub fn entity(key: &str) -> WatchEntity {
    WatchEntity {
        key: key.to_string(),
        ticker: "TST".to_string(),
        risk_keywords: vec!["disruption".to_string()],
        location: None,
        interval_secs: 3600,
    }
}

/// Retries collapse to single-digit milliseconds so failure paths stay fast.
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 5,
        multiplier: 2.0,
        jitter: 0.0,
        max_delay_ms: 20,
    }
}

fn quick_client(service: &'static str) -> Arc<RateLimitedClient> {
    Arc::new(RateLimitedClient::new(service, 1000.0, 1000.0, quick_policy()))
}

/// Scripted behavior for one source kind.
#[derive(Clone)]
pub enum SourceScript {
    /// One news signal per headline, or a single auxiliary signal.
    Items(Vec<&'static str>),
    Down,
    /// Sleeps past any reasonable deadline before answering.
    Hang(Duration),
}

pub struct StubConnector {
    pub news: SourceScript,
    pub market: SourceScript,
    pub weather: SourceScript,
}

impl StubConnector {
    pub fn healthy(headlines: Vec<&'static str>) -> Self {
        Self {
            news: SourceScript::Items(headlines),
            market: SourceScript::Items(vec!["TST -1.20% (volatility normal)"]),
            weather: SourceScript::Items(vec!["Clear skies (severity: calm)"]),
        }
    }
}

#[async_trait]
impl SourceConnector for StubConnector {
    async fn fetch(
        &self,
        entity: &WatchEntity,
        kind: SourceKind,
        _deadline: Instant,
    ) -> Result<Vec<RawSignal>, CallError> {
        let script = match kind {
            SourceKind::News => &self.news,
            SourceKind::Market => &self.market,
            SourceKind::Weather => &self.weather,
        };
        match script {
            SourceScript::Items(texts) => Ok(texts
                .iter()
                .map(|t| RawSignal::new(kind, &entity.key, *t, None))
                .collect()),
            SourceScript::Down => Err(CallError::Unavailable("stub upstream down".into())),
            SourceScript::Hang(d) => {
                tokio::time::sleep(*d).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Relevance = headline mentions "halt". Fails outright on "poison" so tests
/// can exercise per-item isolation.
pub struct TermClassifier;

#[async_trait]
impl Classifier for TermClassifier {
    async fn classify(&self, _entity_key: &str, text: &str) -> Result<bool, CallError> {
        if text.contains("poison") {
            return Err(CallError::Unavailable("classifier choked".into()));
        }
        Ok(text.contains("halt"))
    }
}

/// Always returns a structurally valid assessment at a fixed severity.
pub struct FixedReasoner(pub &'static str);

#[async_trait]
impl Reasoner for FixedReasoner {
    async fn reason(&self, req: &CorrelationRequest<'_>) -> Result<Assessment, CallError> {
        Ok(Assessment {
            severity: self.0.into(),
            impact_estimate: "test impact".into(),
            reasoning: format!("scripted assessment for {}", req.entity_key),
            mitigations: vec!["scripted mitigation".into()],
            confidence: 75.0,
        })
    }
}

/// Sink that never finishes a write.
pub struct StalledSink;

#[async_trait]
impl EventSink for StalledSink {
    async fn save(&self, _event: &RiskEvent) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(())
    }

    async fn exists(&self, _hash: &str) -> Result<bool, SinkError> {
        Ok(false)
    }
}

/// Sink whose writes always fail; `exists` stays quiet so the dedup durable
/// fallback does not interfere.
pub struct BrokenSink;

#[async_trait]
impl EventSink for BrokenSink {
    async fn save(&self, _event: &RiskEvent) -> Result<(), SinkError> {
        Err(SinkError::StorageUnavailable("disk full".into()))
    }

    async fn exists(&self, _hash: &str) -> Result<bool, SinkError> {
        Ok(false)
    }
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub sink: Arc<MemoryEventSink>,
    pub dedup: Arc<MemoryDedup>,
}

pub fn build_pipeline(connector: Arc<dyn SourceConnector>, run_deadline: Duration) -> Harness {
    let sink = Arc::new(MemoryEventSink::new());
    let dedup = Arc::new(MemoryDedup::new());
    let pipeline = pipeline_with(connector, Arc::clone(&dedup), sink.clone(), run_deadline);
    Harness {
        pipeline,
        sink,
        dedup,
    }
}

pub fn pipeline_with(
    connector: Arc<dyn SourceConnector>,
    dedup: Arc<MemoryDedup>,
    sink: Arc<dyn EventSink>,
    run_deadline: Duration,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        connector,
        quick_client("sources"),
        TriageStage::new(Arc::new(TermClassifier), quick_client("classifier"), 4),
        CorrelationStage::new(Arc::new(FixedReasoner("RED")), quick_client("reasoner")),
        dedup,
        sink,
        Arc::new(NotifierMux::none()),
        run_deadline,
    ))
}
