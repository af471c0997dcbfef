use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::TaskwardenError;
use crate::task::TaskType;

/// Smoothing factor for the success-rate moving average
pub const SUCCESS_EMA_DECAY: f64 = 0.9;

/// Backend family of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityType {
    VoiceProvider,
    AutonomousAgent,
    ResearchAgent,
    ToolBridge,
    Custom,
}

impl CapabilityType {
    pub const ALL: [CapabilityType; 5] = [
        CapabilityType::VoiceProvider,
        CapabilityType::AutonomousAgent,
        CapabilityType::ResearchAgent,
        CapabilityType::ToolBridge,
        CapabilityType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::VoiceProvider => "voice-provider",
            CapabilityType::AutonomousAgent => "autonomous-agent",
            CapabilityType::ResearchAgent => "research-agent",
            CapabilityType::ToolBridge => "tool-bridge",
            CapabilityType::Custom => "custom",
        }
    }

    /// Capability families allowed to serve a task type
    pub fn allowed_for(task_type: TaskType) -> &'static [CapabilityType] {
        match task_type {
            TaskType::Voice => &[CapabilityType::VoiceProvider],
            TaskType::Text => &[CapabilityType::AutonomousAgent, CapabilityType::ResearchAgent],
            TaskType::Code => &[CapabilityType::AutonomousAgent],
            TaskType::Research => &[CapabilityType::ResearchAgent, CapabilityType::AutonomousAgent],
            TaskType::Autonomous => &[CapabilityType::AutonomousAgent],
            TaskType::Custom => &[
                CapabilityType::AutonomousAgent,
                CapabilityType::ToolBridge,
                CapabilityType::Custom,
            ],
        }
    }

    /// Whether this family may serve the given task type
    pub fn serves(&self, task_type: TaskType) -> bool {
        Self::allowed_for(task_type).contains(self)
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityType {
    type Err = TaskwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TaskwardenError::Validation(format!("unknown capability type: {}", s)))
    }
}

/// A registered execution backend and its live statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub capability_type: CapabilityType,
    /// Static ranking weight
    pub priority: u32,
    pub enabled: bool,
    pub max_concurrent: u32,
    pub current_load: u32,
    /// Exponential moving average in [0, 1]
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub tags: BTreeSet<String>,
}

impl Capability {
    /// Creates an enabled, idle capability with a perfect track record
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capability_type: CapabilityType,
        priority: u32,
        max_concurrent: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capability_type,
            priority,
            enabled: true,
            max_concurrent,
            current_load: 0,
            success_rate: 1.0,
            avg_latency_ms: 0.0,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Whether the capability can take one more task right now
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent
    }

    /// Whether every required tag is carried
    pub fn has_tags(&self, required: &[String]) -> bool {
        required.iter().all(|tag| self.tags.contains(tag))
    }

    /// Routing score: higher wins
    pub fn score(&self) -> f64 {
        f64::from(self.priority) * 10.0 + self.success_rate * 5.0
            - self.avg_latency_ms / 1000.0
            - f64::from(self.current_load)
    }

    pub(crate) fn acquire(&mut self) {
        self.current_load += 1;
    }

    pub(crate) fn release(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
    }

    /// Folds a successful execution into the moving averages
    pub fn record_success(&mut self, elapsed_ms: f64) {
        self.avg_latency_ms = (self.avg_latency_ms + elapsed_ms) / 2.0;
        self.success_rate = self.success_rate * SUCCESS_EMA_DECAY + (1.0 - SUCCESS_EMA_DECAY);
    }

    /// Decays the success rate toward zero
    pub fn record_failure(&mut self) {
        self.success_rate *= SUCCESS_EMA_DECAY;
    }
}

/// Capabilities registered when the controller is constructed
pub fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability::new("voice-realtime", "Realtime Voice", CapabilityType::VoiceProvider, 9, 5)
            .with_tags(["voice", "speech", "realtime"]),
        Capability::new("agent-autonomous", "Autonomous Agent", CapabilityType::AutonomousAgent, 8, 3)
            .with_tags(["code", "text", "autonomous"]),
        Capability::new("agent-research", "Research Agent", CapabilityType::ResearchAgent, 7, 2)
            .with_tags(["research", "analysis", "text"]),
        Capability::new("bridge-tools", "Tool Bridge", CapabilityType::ToolBridge, 5, 10)
            .with_tags(["tools", "integration"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_decays_monotonically() {
        let mut capability = Capability::new("flaky", "Flaky", CapabilityType::Custom, 1, 1);
        let mut previous = capability.success_rate;
        let mut crossed_at = None;

        for attempt in 1..=10 {
            capability.record_failure();
            assert!(capability.success_rate < previous);
            previous = capability.success_rate;
            if crossed_at.is_none() && capability.success_rate < 0.5 {
                crossed_at = Some(attempt);
            }
        }

        assert_eq!(crossed_at, Some(7));
    }

    #[test]
    fn test_success_moves_toward_one() {
        let mut capability = Capability::new("c", "C", CapabilityType::Custom, 1, 1);
        capability.success_rate = 0.5;
        capability.record_success(200.0);
        assert!((capability.success_rate - 0.55).abs() < 1e-9);
        assert!((capability.avg_latency_ms - 100.0).abs() < 1e-9);
        capability.record_success(100.0);
        assert!((capability.avg_latency_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_formula() {
        let mut capability = Capability::new("c", "C", CapabilityType::ToolBridge, 5, 4);
        capability.success_rate = 0.8;
        capability.avg_latency_ms = 2000.0;
        capability.current_load = 1;
        // 50 + 4 - 2 - 1
        assert!((capability.score() - 51.0).abs() < 1e-9);
    }

    #[test]
    fn test_release_never_underflows() {
        let mut capability = Capability::new("c", "C", CapabilityType::Custom, 1, 1);
        capability.release();
        assert_eq!(capability.current_load, 0);
        capability.acquire();
        assert!(!capability.has_capacity());
    }

    #[test]
    fn test_allow_list() {
        assert!(CapabilityType::VoiceProvider.serves(TaskType::Voice));
        assert!(!CapabilityType::AutonomousAgent.serves(TaskType::Voice));
        assert!(CapabilityType::ResearchAgent.serves(TaskType::Research));
        assert!(CapabilityType::AutonomousAgent.serves(TaskType::Research));
        assert!(CapabilityType::Custom.serves(TaskType::Custom));
        assert!(!CapabilityType::Custom.serves(TaskType::Code));
    }
}
