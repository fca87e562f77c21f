// src/scheduler.rs
// One independent timer per subscription. A timer fire triggers a pipeline
// run unless the entity already has one in flight, in which case the fire is
// skipped (never queued) and recorded. Unsubscribing cancels the timer but
// lets an in-flight run finish.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::WatchEntity;
use crate::pipeline::{Pipeline, RunSummary};

/// Public view of one subscription, with run accounting.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub entity_key: String,
    pub interval_secs: u64,
    pub enabled: bool,
    pub runs_started: u64,
    pub skipped_overlaps: u64,
}

/// Observable monitor activity, as a broadcast stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    RunFinished(RunSummary),
    SkippedOverlap {
        entity_key: String,
        at: DateTime<Utc>,
    },
}

struct SubEntry {
    entity: WatchEntity,
    interval: Duration,
    enabled: bool,
    runs_started: u64,
    skipped_overlaps: u64,
    timer: JoinHandle<()>,
}

struct SchedulerInner {
    pipeline: Arc<Pipeline>,
    subs: Mutex<HashMap<String, SubEntry>>,
    /// Entity keys with a run currently in flight. Claim and release are the
    /// only writers; claiming is atomic under the mutex.
    in_flight: Mutex<HashSet<String>>,
    last_runs: Mutex<HashMap<String, RunSummary>>,
    events_tx: broadcast::Sender<MonitorEvent>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Outcome of a single trigger attempt (timer fire or `run_now`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Started,
    SkippedOverlap,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(SchedulerInner {
                pipeline,
                subs: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                last_runs: Mutex::new(HashMap::new()),
                events_tx,
            }),
        }
    }

    /// Subscribe `entity` with its own timer. Re-subscribing an existing key
    /// replaces the old timer (reconfigure without restart).
    pub fn subscribe(&self, entity: WatchEntity, interval: Duration) {
        let key = entity.key.clone();
        let timer = self.spawn_timer(entity.clone(), interval);
        let mut subs = self.inner.subs.lock().expect("subs mutex poisoned");
        if let Some(old) = subs.insert(
            key.clone(),
            SubEntry {
                entity,
                interval,
                enabled: true,
                runs_started: 0,
                skipped_overlaps: 0,
                timer,
            },
        ) {
            old.timer.abort();
        }
        tracing::info!(entity = %key, interval_secs = interval.as_secs(), "subscribed");
    }

    /// Cancel the timer for `entity_key`. An in-flight run completes on its
    /// own; no further runs are scheduled.
    pub fn unsubscribe(&self, entity_key: &str) -> Result<()> {
        let mut subs = self.inner.subs.lock().expect("subs mutex poisoned");
        let entry = subs
            .remove(entity_key)
            .ok_or_else(|| anyhow!("unknown entity: {entity_key}"))?;
        entry.timer.abort();
        tracing::info!(entity = %entity_key, "unsubscribed");
        Ok(())
    }

    /// Out-of-band run, subject to the same overlap rule as timer fires.
    pub fn run_now(&self, entity_key: &str) -> Result<Trigger> {
        let entity = {
            let subs = self.inner.subs.lock().expect("subs mutex poisoned");
            subs.get(entity_key)
                .map(|e| e.entity.clone())
                .ok_or_else(|| anyhow!("unknown entity: {entity_key}"))?
        };
        Ok(self.inner.trigger(entity))
    }

    pub fn list_subscriptions(&self) -> Vec<Subscription> {
        let subs = self.inner.subs.lock().expect("subs mutex poisoned");
        let mut out: Vec<Subscription> = subs
            .values()
            .map(|e| Subscription {
                entity_key: e.entity.key.clone(),
                interval_secs: e.interval.as_secs(),
                enabled: e.enabled,
                runs_started: e.runs_started,
                skipped_overlaps: e.skipped_overlaps,
            })
            .collect();
        out.sort_by(|a, b| a.entity_key.cmp(&b.entity_key));
        out
    }

    pub fn last_summary(&self, entity_key: &str) -> Option<RunSummary> {
        self.inner
            .last_runs
            .lock()
            .expect("last runs mutex poisoned")
            .get(entity_key)
            .cloned()
    }

    /// Subscribe to the monitor event stream (run summaries, overlap skips).
    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Abort every timer. In-flight runs drain on their own.
    pub fn shutdown(&self) {
        let mut subs = self.inner.subs.lock().expect("subs mutex poisoned");
        for (_, entry) in subs.drain() {
            entry.timer.abort();
        }
    }

    fn spawn_timer(&self, entity: WatchEntity, interval: Duration) -> JoinHandle<()> {
        // The timer holds only a weak handle so a dropped scheduler does not
        // keep ticking forever.
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.trigger(entity.clone());
            }
        })
    }
}

impl SchedulerInner {
    /// Claim the entity and spawn a run, or record an overlap skip. The claim
    /// check and insert happen under one lock so two concurrent fires for the
    /// same entity can never both start.
    fn trigger(self: &Arc<Self>, entity: WatchEntity) -> Trigger {
        let key = entity.key.clone();
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
            if !in_flight.insert(key.clone()) {
                drop(in_flight);
                tracing::info!(entity = %key, "run skipped, previous still in flight");
                counter!("scheduler_skipped_overlaps_total").increment(1);
                self.note_skip(&key);
                let _ = self.events_tx.send(MonitorEvent::SkippedOverlap {
                    entity_key: key,
                    at: Utc::now(),
                });
                return Trigger::SkippedOverlap;
            }
        }

        {
            let mut subs = self.subs.lock().expect("subs mutex poisoned");
            if let Some(entry) = subs.get_mut(&key) {
                entry.runs_started += 1;
            }
        }
        counter!("scheduler_runs_started_total").increment(1);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // Claim release rides on drop so a panicking run cannot leave the
            // entity claimed forever.
            let claim = ClaimGuard {
                inner: Arc::clone(&inner),
                key: key.clone(),
            };
            let summary = inner.pipeline.run(&entity).await;
            inner
                .last_runs
                .lock()
                .expect("last runs mutex poisoned")
                .insert(key.clone(), summary.clone());
            // Release before announcing, so an observer reacting to the
            // summary can start the next run right away.
            drop(claim);
            let _ = inner.events_tx.send(MonitorEvent::RunFinished(summary));
        });
        Trigger::Started
    }

    fn note_skip(&self, key: &str) {
        let mut subs = self.subs.lock().expect("subs mutex poisoned");
        if let Some(entry) = subs.get_mut(key) {
            entry.skipped_overlaps += 1;
        }
    }
}

/// Removes the in-flight claim when dropped, whether the run finished or
/// panicked.
struct ClaimGuard {
    inner: Arc<SchedulerInner>,
    key: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.key);
        }
    }
}
