// src/triage.rs
// Cheap binary relevance gate in front of the expensive correlation step.
// Items run concurrently up to a fan-out cap; a classifier failure on one
// item never blocks or fails the others.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::client::RateLimitedClient;
use crate::error::{CallError, Stage, StageError};
use crate::signal::{RawSignal, TriageVerdict};

/// Binary relevance classifier. Real implementation is an LLM call; tests
/// inject deterministic fakes.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, entity_key: &str, text: &str) -> Result<bool, CallError>;
}

pub struct TriageStage {
    classifier: Arc<dyn Classifier>,
    client: Arc<RateLimitedClient>,
    fan_out: usize,
}

impl TriageStage {
    pub fn new(classifier: Arc<dyn Classifier>, client: Arc<RateLimitedClient>, fan_out: usize) -> Self {
        Self {
            classifier,
            client,
            fan_out: fan_out.max(1),
        }
    }

    /// Every input yields exactly one verdict. A failed classification
    /// degrades to `relevant = false` and records a stage error; output order
    /// is not the input order.
    pub async fn filter(
        &self,
        signals: Vec<RawSignal>,
        deadline: Instant,
    ) -> (Vec<TriageVerdict>, Vec<StageError>) {
        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let mut set: JoinSet<(TriageVerdict, Option<StageError>)> = JoinSet::new();

        for signal in signals {
            let classifier = Arc::clone(&self.classifier);
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let started = Instant::now();
                let result = client
                    .call(deadline, || {
                        classifier.classify(&signal.entity_key, &signal.text)
                    })
                    .await;
                let latency_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(relevant) => (
                        TriageVerdict {
                            signal,
                            relevant,
                            latency_ms,
                        },
                        None,
                    ),
                    Err(e) => {
                        counter!("triage_item_errors_total").increment(1);
                        let err = StageError::partial(
                            Stage::Triage,
                            signal.content_key.clone(),
                            e.to_string(),
                        );
                        (
                            TriageVerdict {
                                signal,
                                relevant: false,
                                latency_ms,
                            },
                            Some(err),
                        )
                    }
                }
            });
        }

        let mut verdicts = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((verdict, err)) => {
                    verdicts.push(verdict);
                    errors.extend(err);
                }
                Err(e) => {
                    // Task panicked; the item is lost but the run survives.
                    tracing::error!(error = %e, "triage task failed");
                    errors.push(StageError::partial(Stage::Triage, "task", e.to_string()));
                }
            }
        }

        counter!("triage_items_total").increment(verdicts.len() as u64);
        counter!("triage_relevant_total")
            .increment(verdicts.iter().filter(|v| v.relevant).count() as u64);
        (verdicts, errors)
    }
}
