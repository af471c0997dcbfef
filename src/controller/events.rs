use serde::Serialize;

use super::ControllerStatus;
use crate::capability::Capability;
use crate::config::{ControllerConfig, OperationMode};
use crate::decision::Decision;
use crate::observability::LogLevel;
use crate::task::Task;

/// Lifecycle notifications published by the task controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControllerEvent {
    Started,
    Stopped,
    TaskQueued(Task),
    TaskStarted { task: Task, capability_id: String },
    TaskCompleted { task: Task, duration_ms: u64 },
    TaskFailed(Task),
    TaskCancelled(Task),
    TaskTimeout(Task),
    TaskFiltered { task: Task, reason: String },
    Decision(Decision),
    ModeChanged { previous: OperationMode, mode: OperationMode },
    ConfigUpdated(ControllerConfig),
    CapabilityRegistered(Capability),
    HealthCheck(ControllerStatus),
    Log { level: LogLevel, message: String },
}

impl ControllerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerEvent::Started => "started",
            ControllerEvent::Stopped => "stopped",
            ControllerEvent::TaskQueued(_) => "task_queued",
            ControllerEvent::TaskStarted { .. } => "task_started",
            ControllerEvent::TaskCompleted { .. } => "task_completed",
            ControllerEvent::TaskFailed(_) => "task_failed",
            ControllerEvent::TaskCancelled(_) => "task_cancelled",
            ControllerEvent::TaskTimeout(_) => "task_timeout",
            ControllerEvent::TaskFiltered { .. } => "task_filtered",
            ControllerEvent::Decision(_) => "decision",
            ControllerEvent::ModeChanged { .. } => "mode_changed",
            ControllerEvent::ConfigUpdated(_) => "config_updated",
            ControllerEvent::CapabilityRegistered(_) => "capability_registered",
            ControllerEvent::HealthCheck(_) => "health_check",
            ControllerEvent::Log { .. } => "log",
        }
    }

    /// The task this event is about, if any
    pub fn task(&self) -> Option<&Task> {
        match self {
            ControllerEvent::TaskQueued(task)
            | ControllerEvent::TaskStarted { task, .. }
            | ControllerEvent::TaskCompleted { task, .. }
            | ControllerEvent::TaskFailed(task)
            | ControllerEvent::TaskCancelled(task)
            | ControllerEvent::TaskTimeout(task)
            | ControllerEvent::TaskFiltered { task, .. } => Some(task),
            _ => None,
        }
    }
}
