use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::TaskwardenError;

/// Kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Speech in, speech out
    Voice,
    /// Plain text generation or transformation
    Text,
    /// Code generation or execution
    Code,
    /// Multi-step information gathering
    Research,
    /// Long-running agent work
    Autonomous,
    /// Anything else
    Custom,
}

impl TaskType {
    /// All task types in declaration order
    pub const ALL: [TaskType; 6] = [
        TaskType::Voice,
        TaskType::Text,
        TaskType::Code,
        TaskType::Research,
        TaskType::Autonomous,
        TaskType::Custom,
    ];

    /// Wire name of the task type
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Voice => "voice",
            TaskType::Text => "text",
            TaskType::Code => "code",
            TaskType::Research => "research",
            TaskType::Autonomous => "autonomous",
            TaskType::Custom => "custom",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TaskwardenError::Validation(format!("unknown task type: {}", s)))
    }
}

/// Scheduling class of a task. Lower rank dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Dispatch rank: 0 drains first
    pub fn rank(&self) -> usize {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = TaskwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            other => Err(TaskwardenError::Validation(format!("unknown priority: {}", other))),
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-submission overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// Scheduling class
    pub priority: TaskPriority,
    /// Overrides the controller's default retry budget
    pub max_retries: Option<u32>,
    /// Capabilities must carry every one of these tags
    pub required_tags: Vec<String>,
}

impl SubmitOptions {
    pub fn with_priority(priority: TaskPriority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn require_tag(mut self, tag: impl Into<String>) -> Self {
        self.required_tags.push(tag.into());
        self
    }
}

/// A unit of submitted work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub input: Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tags: Vec<String>,
}

impl Task {
    /// Creates a queued task with a fresh id
    pub fn new(task_type: TaskType, input: Value, priority: TaskPriority, max_retries: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type,
            input,
            priority,
            status: TaskStatus::Queued,
            assigned_to: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            required_tags: Vec::new(),
        }
    }

    /// Whether another attempt is allowed after a failure
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Milliseconds since the task was created
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds()
    }

    pub(crate) fn mark_running(&mut self, capability_id: &str) {
        self.assigned_to = Some(capability_id.to_string());
        self.status = TaskStatus::Assigned;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_requeued(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Queued;
        self.assigned_to = None;
        self.started_at = None;
    }

    pub(crate) fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_cancelled(&mut self, reason: Option<&str>) {
        self.status = TaskStatus::Cancelled;
        if let Some(reason) = reason {
            self.error = Some(reason.to_string());
        }
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("voice", TaskType::Voice)]
    #[test_case("TEXT", TaskType::Text)]
    #[test_case(" code ", TaskType::Code)]
    #[test_case("research", TaskType::Research)]
    #[test_case("autonomous", TaskType::Autonomous)]
    #[test_case("custom", TaskType::Custom)]
    fn test_parse_task_type(input: &str, expected: TaskType) {
        assert_eq!(input.parse::<TaskType>().unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("telepathy".parse::<TaskType>().is_err());
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn test_priority_rank_order() {
        let mut priorities = vec![
            TaskPriority::Low,
            TaskPriority::Critical,
            TaskPriority::Normal,
            TaskPriority::High,
        ];
        priorities.sort_by_key(|p| p.rank());
        assert_eq!(
            priorities,
            vec![TaskPriority::Critical, TaskPriority::High, TaskPriority::Normal, TaskPriority::Low]
        );
    }

    #[test]
    fn test_lifecycle_transitions_keep_completed_at_consistent() {
        let mut task = Task::new(TaskType::Code, json!({"prompt": "fizzbuzz"}), TaskPriority::High, 1);
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.completed_at.is_none());

        task.mark_running("agent-autonomous");
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_to.as_deref(), Some("agent-autonomous"));
        assert!(task.started_at.is_some());

        task.mark_requeued();
        assert_eq!(task.retry_count, 1);
        assert!(task.assigned_to.is_none());
        assert!(!task.can_retry());

        task.mark_failed("boom");
        assert!(task.status.is_terminal());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_task_serializes_type_field() {
        let task = Task::new(TaskType::Voice, json!({}), TaskPriority::Normal, 3);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "voice");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["priority"], "normal");
    }
}
