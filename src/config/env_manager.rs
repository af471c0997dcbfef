use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::registry::ServiceType;

/// An environment variable that points at a backing service
#[derive(Debug, Clone, Copy)]
pub struct ServiceEnvVar {
    /// Variable name
    pub name: &'static str,
    /// Service family the URL belongs to
    pub service_type: ServiceType,
    /// Human readable label used for the endpoint name
    pub label: &'static str,
}

/// Variables scanned when the registry loads endpoints, in scan order
pub const SERVICE_ENV_VARS: &[ServiceEnvVar] = &[
    ServiceEnvVar { name: "VOICE_SERVICE_URL", service_type: ServiceType::VoiceProvider, label: "Voice Service" },
    ServiceEnvVar { name: "VAPI_SERVER_URL", service_type: ServiceType::VoiceProvider, label: "Vapi Server" },
    ServiceEnvVar { name: "AGENT_SERVICE_URL", service_type: ServiceType::AutonomousAgent, label: "Agent Service" },
    ServiceEnvVar { name: "AUTONOMOUS_AGENT_URL", service_type: ServiceType::AutonomousAgent, label: "Autonomous Agent" },
    ServiceEnvVar { name: "RESEARCH_SERVICE_URL", service_type: ServiceType::ResearchAgent, label: "Research Service" },
    ServiceEnvVar { name: "MCP_BRIDGE_URL", service_type: ServiceType::ToolBridge, label: "MCP Bridge" },
    ServiceEnvVar { name: "TOOL_BRIDGE_URL", service_type: ServiceType::ToolBridge, label: "Tool Bridge" },
    ServiceEnvVar { name: "WEBHOOK_URL", service_type: ServiceType::Webhook, label: "Webhook" },
    ServiceEnvVar { name: "N8N_WEBHOOK_URL", service_type: ServiceType::Webhook, label: "n8n Webhook" },
    ServiceEnvVar { name: "CHANNEL_GATEWAY_URL", service_type: ServiceType::Channel, label: "Channel Gateway" },
];

/// Credentials whose presence is reported. Values are never read beyond "set or not".
pub const CREDENTIAL_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "ELEVENLABS_API_KEY",
    "DEEPGRAM_API_KEY",
    "TELEGRAM_BOT_TOKEN",
    "DISCORD_BOT_TOKEN",
    "SLACK_BOT_TOKEN",
    "GITHUB_TOKEN",
];

/// Presence of a credential variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFlag {
    pub name: String,
    pub present: bool,
}

/// Frozen copy of the environment
///
/// Reading through a snapshot keeps the registry and config deterministic and
/// lets tests inject variables without touching the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Captures the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Builds a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Value of a variable, treating blank values as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Presence flags for every known credential variable
pub fn credential_flags(env: &EnvSnapshot) -> Vec<CredentialFlag> {
    CREDENTIAL_ENV_VARS
        .iter()
        .map(|name| CredentialFlag {
            name: (*name).to_string(),
            present: env.is_set(name),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values_are_unset() {
        let env = EnvSnapshot::from_pairs([("OPENAI_API_KEY", "  "), ("GITHUB_TOKEN", "ghp_x")]);
        assert!(!env.is_set("OPENAI_API_KEY"));
        assert_eq!(env.get("GITHUB_TOKEN"), Some("ghp_x"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn test_credential_flags_cover_table() {
        let env = EnvSnapshot::from_pairs([("TELEGRAM_BOT_TOKEN", "123:abc")]);
        let flags = credential_flags(&env);
        assert_eq!(flags.len(), CREDENTIAL_ENV_VARS.len());
        let telegram = flags.iter().find(|f| f.name == "TELEGRAM_BOT_TOKEN").unwrap();
        assert!(telegram.present);
        assert!(flags.iter().filter(|f| f.present).count() == 1);
    }

    #[test]
    fn test_service_table_names_are_unique() {
        let mut names: Vec<_> = SERVICE_ENV_VARS.iter().map(|v| v.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SERVICE_ENV_VARS.len());
    }
}
