// src/error.rs
// Error taxonomy shared across the pipeline. Transient errors are retried at
// the client layer; stage errors are collected into the run summary.

use serde::{Deserialize, Serialize};

/// Failure of a single outbound call (connector, classifier, reasoner).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("rate limited")]
    RateLimited,
    #[error("timed out")]
    Timeout,
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CallError {
    /// Transient errors are worth another attempt with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::RateLimited | CallError::Timeout)
    }
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Triage,
    Correlate,
    Dedupe,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Triage => "triage",
            Stage::Correlate => "correlate",
            Stage::Dedupe => "dedupe",
            Stage::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// How badly a stage failed. Partial failures degrade the run; total failures
/// abort it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PartialUpstream,
    TotalStage,
    DataIntegrity,
    Storage,
}

/// One error captured during a run; lives in `RunSummary.errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub kind: FailureKind,
    /// Which upstream or item the error is about (source name, content key).
    pub subject: String,
    pub detail: String,
}

impl StageError {
    pub fn partial(stage: Stage, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::PartialUpstream,
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    pub fn total(stage: Stage, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::TotalStage,
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    pub fn integrity(stage: Stage, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::DataIntegrity,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:?}] {}: {}",
            self.stage, self.kind, self.subject, self.detail
        )
    }
}

/// Failure of the persistence sink.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}
