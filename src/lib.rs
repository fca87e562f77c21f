// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod client;
pub mod config;
pub mod connectors;
pub mod correlate;
pub mod dedup;
pub mod error;
pub mod event;
pub mod metrics;
pub mod notify;
pub mod persist;
pub mod pipeline;
pub mod scheduler;
pub mod signal;
pub mod status;
pub mod triage;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::pipeline::{Pipeline, RunState, RunSummary};
pub use crate::scheduler::{MonitorEvent, Scheduler, Subscription, Trigger};
