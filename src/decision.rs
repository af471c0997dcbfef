//! Audit records of autonomous choices
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of autonomous choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Route,
    Scale,
    Heal,
    Optimize,
    Restrict,
    Unrestrict,
}

impl DecisionType {
    pub const ALL: [DecisionType; 6] = [
        DecisionType::Route,
        DecisionType::Scale,
        DecisionType::Heal,
        DecisionType::Optimize,
        DecisionType::Restrict,
        DecisionType::Unrestrict,
    ];

    /// Fixed confidence attached to every decision of this type
    pub fn base_confidence(&self) -> f64 {
        match self {
            DecisionType::Route => 0.9,
            DecisionType::Scale => 0.8,
            DecisionType::Heal => 0.85,
            DecisionType::Optimize => 0.75,
            DecisionType::Restrict => 0.7,
            DecisionType::Unrestrict => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Route => "route",
            DecisionType::Scale => "scale",
            DecisionType::Heal => "heal",
            DecisionType::Optimize => "optimize",
            DecisionType::Restrict => "restrict",
            DecisionType::Unrestrict => "unrestrict",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logged autonomous decision. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub reason: String,
    pub input: Value,
    pub output: Value,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub executed: bool,
    pub requires_approval: bool,
}

impl Decision {
    pub fn new(
        decision_type: DecisionType,
        reason: impl Into<String>,
        input: Value,
        output: Value,
        requires_approval: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            decision_type,
            reason: reason.into(),
            input,
            output,
            confidence: decision_type.base_confidence(),
            timestamp: Utc::now(),
            executed: !requires_approval,
            requires_approval,
        }
    }
}

/// Append-only decision history
#[derive(Debug, Default, Clone)]
pub struct DecisionLog {
    entries: Vec<Decision>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a decision and returns a copy of it
    pub fn record(
        &mut self,
        decision_type: DecisionType,
        reason: impl Into<String>,
        input: Value,
        output: Value,
        requires_approval: bool,
    ) -> Decision {
        let decision = Decision::new(decision_type, reason, input, output, requires_approval);
        self.entries.push(decision.clone());
        decision
    }

    /// The most recent `limit` decisions, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Decision> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..].to_vec()
    }

    pub fn count_of(&self, decision_type: DecisionType) -> usize {
        self.entries.iter().filter(|d| d.decision_type == decision_type).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
