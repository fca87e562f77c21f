// src/correlate.rs
// Joins triage-approved news with auxiliary market/weather signals and turns
// reasoner output into validated risk events.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::time::Instant;

use crate::client::RateLimitedClient;
use crate::dedup::content_hash;
use crate::error::{CallError, Stage, StageError};
use crate::event::{Assessment, RiskEvent, Severity};
use crate::signal::RawSignal;

/// One correlation request: a relevant news signal plus whatever auxiliary
/// context was fetched for the entity.
pub struct CorrelationRequest<'a> {
    pub entity_key: &'a str,
    pub news: &'a RawSignal,
    pub market: Option<&'a RawSignal>,
    pub weather: Option<&'a RawSignal>,
}

/// Deep-reasoning collaborator producing structured assessments.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, req: &CorrelationRequest<'_>) -> Result<Assessment, CallError>;
}

pub struct CorrelationStage {
    reasoner: Arc<dyn Reasoner>,
    client: Arc<RateLimitedClient>,
}

impl CorrelationStage {
    pub fn new(reasoner: Arc<dyn Reasoner>, client: Arc<RateLimitedClient>) -> Self {
        Self { reasoner, client }
    }

    /// Assess every relevant signal. An empty result is a valid outcome.
    ///
    /// Malformed reasoner output is retried once and then discarded with a
    /// recorded integrity error. Transport failures fail the whole batch:
    /// correlation joins multiple signals, so there is no per-item degrade
    /// the way triage has.
    pub async fn assess(
        &self,
        entity_key: &str,
        relevant: &[RawSignal],
        market: Option<&RawSignal>,
        weather: Option<&RawSignal>,
        deadline: Instant,
    ) -> Result<(Vec<RiskEvent>, Vec<StageError>), StageError> {
        let mut events = Vec::new();
        let mut errors = Vec::new();

        for news in relevant {
            let req = CorrelationRequest {
                entity_key,
                news,
                market,
                weather,
            };

            match self.assess_one(&req, deadline).await {
                Ok(Some((severity, assessment))) => {
                    let mut source_signals = BTreeSet::new();
                    source_signals.insert(news.content_key.clone());
                    if let Some(m) = market {
                        source_signals.insert(m.content_key.clone());
                    }
                    if let Some(w) = weather {
                        source_signals.insert(w.content_key.clone());
                    }
                    match RiskEvent::from_assessment(
                        content_hash(&news.content_key),
                        entity_key,
                        news.text.clone(),
                        news.url.clone(),
                        severity,
                        &assessment,
                        source_signals,
                    ) {
                        Some(event) => events.push(event),
                        None => errors.push(StageError::integrity(
                            Stage::Correlate,
                            news.content_key.clone(),
                            "assessment produced no source signals",
                        )),
                    }
                }
                Ok(None) => {
                    errors.push(StageError::integrity(
                        Stage::Correlate,
                        news.content_key.clone(),
                        "malformed assessment discarded after one retry",
                    ));
                }
                Err(e) => {
                    counter!("correlate_batch_failures_total").increment(1);
                    return Err(StageError::total(Stage::Correlate, entity_key, e.to_string()));
                }
            }
        }

        counter!("correlate_events_total").increment(events.len() as u64);
        Ok((events, errors))
    }

    /// One reasoner round-trip with a single re-ask on structurally invalid
    /// output. `Ok(None)` means the response stayed malformed.
    async fn assess_one(
        &self,
        req: &CorrelationRequest<'_>,
        deadline: Instant,
    ) -> Result<Option<(Severity, Assessment)>, CallError> {
        for round in 0..2 {
            let outcome = self
                .client
                .call(deadline, || self.reasoner.reason(req))
                .await;

            let assessment = match outcome {
                Ok(a) => a,
                Err(CallError::Malformed(detail)) => {
                    tracing::warn!(entity = req.entity_key, round, %detail, "malformed assessment");
                    counter!("correlate_malformed_total").increment(1);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match assessment.validate() {
                Ok(severity) => return Ok(Some((severity, assessment))),
                Err(why) => {
                    tracing::warn!(entity = req.entity_key, round, %why, "invalid assessment");
                    counter!("correlate_malformed_total").increment(1);
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::event::Severity;
    use crate::signal::SourceKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedReasoner {
        calls: AtomicU32,
        severities: Vec<&'static str>,
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn reason(&self, _req: &CorrelationRequest<'_>) -> Result<Assessment, CallError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let severity = self.severities[i.min(self.severities.len() - 1)];
            Ok(Assessment {
                severity: severity.into(),
                impact_estimate: "limited".into(),
                reasoning: "signals point the same way".into(),
                mitigations: vec!["alternate supplier".into()],
                confidence: 70.0,
            })
        }
    }

    fn stage(reasoner: Arc<dyn Reasoner>) -> CorrelationStage {
        let client = Arc::new(RateLimitedClient::new(
            "reasoner",
            100.0,
            100.0,
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
                multiplier: 1.0,
                jitter: 0.0,
                max_delay_ms: 1,
            },
        ));
        CorrelationStage::new(reasoner, client)
    }

    fn news(text: &str) -> RawSignal {
        RawSignal::new(SourceKind::News, "Acme", text, None)
    }

    #[tokio::test]
    async fn produces_event_with_joined_source_signals() {
        let stage = stage(Arc::new(ScriptedReasoner {
            calls: AtomicU32::new(0),
            severities: vec!["RED"],
        }));
        let market = RawSignal::new(SourceKind::Market, "Acme", "ACME -4.2%", None);
        let relevant = vec![news("Fire at main fab")];
        let deadline = Instant::now() + Duration::from_secs(5);
        let (events, errors) = stage
            .assess("Acme", &relevant, Some(&market), None, deadline)
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Red);
        assert_eq!(events[0].source_signals.len(), 2);
    }

    #[tokio::test]
    async fn invalid_severity_retried_once_then_discarded() {
        let reasoner = Arc::new(ScriptedReasoner {
            calls: AtomicU32::new(0),
            severities: vec!["PURPLE", "PURPLE"],
        });
        let stage = stage(reasoner.clone());
        let relevant = vec![news("Odd story")];
        let deadline = Instant::now() + Duration::from_secs(5);
        let (events, errors) = stage
            .assess("Acme", &relevant, None, None, deadline)
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].detail.contains("malformed"));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_attempt_can_recover() {
        let stage = stage(Arc::new(ScriptedReasoner {
            calls: AtomicU32::new(0),
            severities: vec!["PURPLE", "YELLOW"],
        }));
        let relevant = vec![news("Recoverable story")];
        let deadline = Instant::now() + Duration::from_secs(5);
        let (events, errors) = stage
            .assess("Acme", &relevant, None, None, deadline)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(errors.is_empty());
        assert_eq!(events[0].severity, Severity::Yellow);
    }

    struct DownReasoner;

    #[async_trait]
    impl Reasoner for DownReasoner {
        async fn reason(&self, _req: &CorrelationRequest<'_>) -> Result<Assessment, CallError> {
            Err(CallError::Unavailable("reasoner down".into()))
        }
    }

    #[tokio::test]
    async fn transport_failure_fails_the_batch() {
        let stage = stage(Arc::new(DownReasoner));
        let relevant = vec![news("a"), news("b")];
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = stage
            .assess("Acme", &relevant, None, None, deadline)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Correlate);
    }
}
