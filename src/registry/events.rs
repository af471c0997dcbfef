use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::Decision;
use crate::observability::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEventKind {
    Discovered,
    Connected,
    Disconnected,
    Healed,
    Error,
    ConfigChanged,
}

impl ConfigEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigEventKind::Discovered => "discovered",
            ConfigEventKind::Connected => "connected",
            ConfigEventKind::Disconnected => "disconnected",
            ConfigEventKind::Healed => "healed",
            ConfigEventKind::Error => "error",
            ConfigEventKind::ConfigChanged => "config_changed",
        }
    }
}

/// A change in what the registry knows about an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEvent {
    pub kind: ConfigEventKind,
    pub endpoint_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ConfigEvent {
    pub fn new(kind: ConfigEventKind, endpoint_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint_id: endpoint_id.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RegistryEvent {
    Started { endpoints: usize },
    Stopped,
    ConfigEvent(ConfigEvent),
    Decision(Decision),
    Notification { event: String, payload: Value },
    Log { level: LogLevel, message: String },
}

impl RegistryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::Started { .. } => "started",
            RegistryEvent::Stopped => "stopped",
            RegistryEvent::ConfigEvent(_) => "config_event",
            RegistryEvent::Decision(_) => "decision",
            RegistryEvent::Notification { .. } => "notification",
            RegistryEvent::Log { .. } => "log",
        }
    }
}
