// src/event.rs
// Structured risk events and the reasoner output contract.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Traffic-light severity scheme:
///   Red    — high impact, immediate notification
///   Yellow — moderate, monitor closely
///   Green  — low / resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Green,
    Yellow,
    Red,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREEN" | "LOW" => Some(Severity::Green),
            "YELLOW" | "MEDIUM" => Some(Severity::Yellow),
            "RED" | "HIGH" => Some(Severity::Red),
            _ => None,
        }
    }
}

/// Raw structured output from the reasoner, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub severity: String,
    pub impact_estimate: String,
    pub reasoning: String,
    #[serde(default, alias = "mitigation_strategies")]
    pub mitigations: Vec<String>,
    #[serde(default, alias = "confidence_score")]
    pub confidence: f32,
}

impl Assessment {
    /// Structural validation only; content is opaque. Returns the parsed
    /// severity or a description of what is wrong.
    pub fn validate(&self) -> Result<Severity, String> {
        let sev = Severity::parse(&self.severity)
            .ok_or_else(|| format!("severity not in {{GREEN,YELLOW,RED}}: {:?}", self.severity))?;
        if self.reasoning.trim().is_empty() {
            return Err("empty reasoning".into());
        }
        if self.mitigations.iter().all(|m| m.trim().is_empty()) {
            return Err("no mitigation strategies".into());
        }
        Ok(sev)
    }
}

/// A persisted risk event. Immutable after creation; `id` is the dedup hash
/// of the primary signal's content key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskEvent {
    pub id: String,
    pub entity_key: String,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
    pub headline: String,
    pub source_url: Option<String>,
    pub impact_estimate: String,
    pub reasoning: String,
    pub mitigations: Vec<String>,
    pub confidence: f32,
    /// Content keys of every signal that fed the assessment. Never empty.
    pub source_signals: BTreeSet<String>,
}

impl RiskEvent {
    pub fn from_assessment(
        id: String,
        entity_key: impl Into<String>,
        headline: impl Into<String>,
        source_url: Option<String>,
        severity: Severity,
        assessment: &Assessment,
        source_signals: BTreeSet<String>,
    ) -> Option<Self> {
        if source_signals.is_empty() {
            return None;
        }
        Some(Self {
            id,
            entity_key: entity_key.into(),
            created_at: Utc::now(),
            severity,
            headline: headline.into(),
            source_url,
            impact_estimate: assessment.impact_estimate.clone(),
            reasoning: assessment.reasoning.clone(),
            mitigations: assessment.mitigations.clone(),
            confidence: assessment.confidence,
            source_signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment(sev: &str) -> Assessment {
        Assessment {
            severity: sev.into(),
            impact_estimate: "minor".into(),
            reasoning: "because".into(),
            mitigations: vec!["watch".into()],
            confidence: 50.0,
        }
    }

    #[test]
    fn severity_parses_synonyms_case_insensitively() {
        assert_eq!(Severity::parse("red"), Some(Severity::Red));
        assert_eq!(Severity::parse(" HIGH "), Some(Severity::Red));
        assert_eq!(Severity::parse("medium"), Some(Severity::Yellow));
        assert_eq!(Severity::parse("purple"), None);
    }

    #[test]
    fn validation_rejects_empty_reasoning() {
        let mut a = assessment("GREEN");
        a.reasoning = "  ".into();
        assert!(a.validate().is_err());
    }

    #[test]
    fn event_requires_source_signals() {
        let a = assessment("RED");
        let ev = RiskEvent::from_assessment(
            "h".into(),
            "Acme",
            "headline",
            None,
            Severity::Red,
            &a,
            BTreeSet::new(),
        );
        assert!(ev.is_none());
    }
}
