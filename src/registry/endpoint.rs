use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TaskwardenError;

/// Family of a backing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    VoiceProvider,
    AutonomousAgent,
    ResearchAgent,
    ToolBridge,
    Webhook,
    Channel,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::VoiceProvider,
        ServiceType::AutonomousAgent,
        ServiceType::ResearchAgent,
        ServiceType::ToolBridge,
        ServiceType::Webhook,
        ServiceType::Channel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::VoiceProvider => "voice-provider",
            ServiceType::AutonomousAgent => "autonomous-agent",
            ServiceType::ResearchAgent => "research-agent",
            ServiceType::ToolBridge => "tool-bridge",
            ServiceType::Webhook => "webhook",
            ServiceType::Channel => "channel",
        }
    }

    /// Display label used for discovered endpoints
    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::VoiceProvider => "Voice Provider",
            ServiceType::AutonomousAgent => "Autonomous Agent",
            ServiceType::ResearchAgent => "Research Agent",
            ServiceType::ToolBridge => "Tool Bridge",
            ServiceType::Webhook => "Webhook",
            ServiceType::Channel => "Channel",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = TaskwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TaskwardenError::Validation(format!("unknown service type: {}", s)))
    }
}

/// Liveness of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Checking,
    Healthy,
    /// Alive but slower than the configured latency threshold
    Degraded,
    Unhealthy,
}

impl EndpointStatus {
    /// Whether the endpoint answered its last probe
    pub fn is_available(&self) -> bool {
        matches!(self, EndpointStatus::Healthy | EndpointStatus::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Unknown => "unknown",
            EndpointStatus::Checking => "checking",
            EndpointStatus::Healthy => "healthy",
            EndpointStatus::Degraded => "degraded",
            EndpointStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backing-service address tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub url: String,
    #[serde(default)]
    pub status: EndpointStatus,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    /// Last time a probe found the endpoint available
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub auto_discovered: bool,
}

impl ServiceEndpoint {
    /// A manually described endpoint in `unknown` state
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        service_type: ServiceType,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service_type,
            url: url.into(),
            status: EndpointStatus::Unknown,
            last_check: None,
            last_seen: None,
            latency_ms: None,
            config: None,
            auto_discovered: false,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_wire_names() {
        for service_type in ServiceType::ALL {
            let json = serde_json::to_value(service_type).unwrap();
            assert_eq!(json, service_type.as_str());
            assert_eq!(service_type.as_str().parse::<ServiceType>().unwrap(), service_type);
        }
    }

    #[test]
    fn test_endpoint_deserializes_with_defaults() {
        let endpoint: ServiceEndpoint = serde_json::from_str(
            r#"{"id":"svc-1","name":"Bridge","type":"tool-bridge","url":"http://localhost:3333"}"#,
        )
        .unwrap();
        assert_eq!(endpoint.status, EndpointStatus::Unknown);
        assert!(!endpoint.auto_discovered);
        assert!(endpoint.last_check.is_none());
    }

    #[test]
    fn test_availability() {
        assert!(EndpointStatus::Healthy.is_available());
        assert!(EndpointStatus::Degraded.is_available());
        assert!(!EndpointStatus::Unhealthy.is_available());
        assert!(!EndpointStatus::Unknown.is_available());
    }
}
