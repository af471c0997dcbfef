mod env_manager;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{TaskwardenError, Result};
use crate::logging::LogFormat;
use crate::registry::ServiceType;

pub use env_manager::{
    credential_flags, CredentialFlag, EnvSnapshot, ServiceEnvVar,
    CREDENTIAL_ENV_VARS, SERVICE_ENV_VARS,
};

/// Controller-wide policy switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Decisions require approval, filtering and safety checks forced on
    Supervised,
    /// Decisions auto-execute, filtering flags left as configured
    #[default]
    Autonomous,
    /// Filtering and safety checks forced off
    Unrestricted,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Supervised => "supervised",
            OperationMode::Autonomous => "autonomous",
            OperationMode::Unrestricted => "unrestricted",
        }
    }

    /// Whether decisions taken in this mode wait for approval
    pub fn requires_approval(&self) -> bool {
        matches!(self, OperationMode::Supervised)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = TaskwardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "supervised" => Ok(OperationMode::Supervised),
            "autonomous" => Ok(OperationMode::Autonomous),
            "unrestricted" => Ok(OperationMode::Unrestricted),
            other => Err(TaskwardenError::Config(format!("unknown operation mode: {}", other))),
        }
    }
}

/// Main configuration struct for the application
///
/// Every section falls back to its defaults when omitted from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task controller settings
    pub controller: ControllerConfig,
    /// Service registry and health monitor settings
    pub registry: RegistryConfig,
    /// Observability hub buffer sizes and timeouts
    pub observability: ObservabilityConfig,
    /// HTTP surface settings
    pub server: ServerConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Settings for the autonomous task controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Operation mode at startup
    pub mode: OperationMode,
    /// Upper bound on simultaneously running tasks
    pub max_concurrent_tasks: usize,
    /// Default retry budget per task
    pub max_retries: u32,
    /// Maximum time a task may wait in the queue
    pub task_timeout_ms: u64,
    /// Dispatch tick
    pub dispatch_interval_ms: u64,
    /// Health monitor tick
    pub health_interval_ms: u64,
    /// Delay before an auto-disabled capability is re-enabled
    pub reenable_cooldown_ms: u64,
    /// Success rate under which a capability is auto-disabled
    pub disable_threshold: f64,
    /// Success rate a capability restarts from after its cooldown
    pub reenable_success_rate: f64,
    /// Run the content filter on submission
    pub content_filtering: bool,
    /// Safety guardrails flag, forced by mode changes
    pub safety_guardrails: bool,
    /// Auto-disable underperformers and log retry heals
    pub self_healing: bool,
    /// Register the built-in capability set on construction
    pub register_default_capabilities: bool,
    /// Regex patterns rejected by the default content filter
    pub blocklist: Vec<String>,
}

impl ControllerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn reenable_cooldown(&self) -> Duration {
        Duration::from_millis(self.reenable_cooldown_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Autonomous,
            max_concurrent_tasks: 10,
            max_retries: 3,
            task_timeout_ms: 300_000,
            dispatch_interval_ms: 100,
            health_interval_ms: 10_000,
            reenable_cooldown_ms: 60_000,
            disable_threshold: 0.5,
            reenable_success_rate: 0.7,
            content_filtering: false,
            safety_guardrails: true,
            self_healing: true,
            register_default_capabilities: true,
            blocklist: Vec::new(),
        }
    }
}

/// A well-known port probed during network discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPort {
    pub service_type: ServiceType,
    pub port: u16,
}

/// Settings for the service registry and health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Probe the host/port matrix at startup
    pub auto_discovery: bool,
    /// Probe every not-yet-healthy endpoint at startup
    pub auto_connect: bool,
    /// Log heal decisions when an endpoint recovers
    pub auto_heal: bool,
    /// Periodic health check interval
    pub health_check_interval_ms: u64,
    /// Per-request probe timeout
    pub probe_timeout_ms: u64,
    /// Upper bound on probes in flight
    pub max_concurrent_probes: usize,
    /// Hosts probed during discovery
    pub discovery_hosts: Vec<String>,
    /// Ports probed on every discovery host
    pub discovery_ports: Vec<DiscoveryPort>,
    /// Alive probes slower than this are reported degraded. Unset disables degradation.
    pub degraded_latency_ms: Option<u64>,
}

impl RegistryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auto_discovery: true,
            auto_connect: true,
            auto_heal: true,
            health_check_interval_ms: 30_000,
            probe_timeout_ms: 2_000,
            max_concurrent_probes: 16,
            discovery_hosts: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "host.docker.internal".to_string(),
            ],
            discovery_ports: default_discovery_ports(),
            degraded_latency_ms: None,
        }
    }
}

/// Well-known ports per service family
pub fn default_discovery_ports() -> Vec<DiscoveryPort> {
    [
        (ServiceType::VoiceProvider, 8880),
        (ServiceType::VoiceProvider, 5002),
        (ServiceType::AutonomousAgent, 8000),
        (ServiceType::AutonomousAgent, 3000),
        (ServiceType::ResearchAgent, 8001),
        (ServiceType::ResearchAgent, 8100),
        (ServiceType::ToolBridge, 3333),
        (ServiceType::ToolBridge, 8811),
    ]
    .into_iter()
    .map(|(service_type, port)| DiscoveryPort { service_type, port })
    .collect()
}

/// Buffer caps and timeouts for the observability hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub max_log_entries: usize,
    pub max_completed_spans: usize,
    pub max_alerts: usize,
    pub histogram_max_samples: usize,
    /// Log entries included in the dashboard snapshot
    pub dashboard_recent_logs: usize,
    pub health_check_timeout_ms: u64,
}

impl ObservabilityConfig {
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 1_000,
            max_completed_spans: 1_000,
            max_alerts: 500,
            histogram_max_samples: 1_000,
            dashboard_recent_logs: 50,
            health_check_timeout_ms: 5_000,
        }
    }
}

/// HTTP surface settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Optional webhook that receives notifications as JSON
    pub notify_webhook: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7420".to_string(),
            notify_webhook: None,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("taskwarden").join("config.toml"))
    }

    /// Loads configuration from the default config file location
    ///
    /// If the config file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads and validates configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskwardenError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TaskwardenError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Applies `TASKWARDEN_*` overrides from the environment
    pub fn apply_env_overrides(&mut self, env: &EnvSnapshot) -> Result<()> {
        if let Some(mode) = env.get("TASKWARDEN_MODE") {
            self.controller.mode = mode.parse()?;
        }
        if let Some(value) = env.get("TASKWARDEN_MAX_CONCURRENT_TASKS") {
            self.controller.max_concurrent_tasks = parse_env("TASKWARDEN_MAX_CONCURRENT_TASKS", value)?;
        }
        if let Some(value) = env.get("TASKWARDEN_MAX_RETRIES") {
            self.controller.max_retries = parse_env("TASKWARDEN_MAX_RETRIES", value)?;
        }
        if let Some(value) = env.get("TASKWARDEN_TASK_TIMEOUT_MS") {
            self.controller.task_timeout_ms = parse_env("TASKWARDEN_TASK_TIMEOUT_MS", value)?;
        }
        if let Some(value) = env.get("TASKWARDEN_AUTO_DISCOVERY") {
            self.registry.auto_discovery = parse_env("TASKWARDEN_AUTO_DISCOVERY", value)?;
        }
        if let Some(level) = env.get("TASKWARDEN_LOG_LEVEL") {
            self.logging.level = level.to_string();
        }
        if let Some(bind) = env.get("TASKWARDEN_BIND") {
            self.server.bind = bind.to_string();
        }
        Ok(())
    }

    /// Rejects settings the controller and registry cannot run with
    pub fn validate(&self) -> Result<()> {
        let controller = &self.controller;
        if controller.max_concurrent_tasks == 0 {
            return Err(TaskwardenError::Config("max_concurrent_tasks must be at least 1".into()));
        }
        if controller.dispatch_interval_ms == 0 || controller.health_interval_ms == 0 {
            return Err(TaskwardenError::Config("controller tick intervals must be non-zero".into()));
        }
        for (name, value) in [
            ("disable_threshold", controller.disable_threshold),
            ("reenable_success_rate", controller.reenable_success_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TaskwardenError::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        for pattern in &controller.blocklist {
            regex::Regex::new(pattern)
                .map_err(|e| TaskwardenError::Config(format!("invalid blocklist pattern {:?}: {}", pattern, e)))?;
        }
        if self.registry.health_check_interval_ms == 0 || self.registry.probe_timeout_ms == 0 {
            return Err(TaskwardenError::Config("registry intervals must be non-zero".into()));
        }
        if self.registry.max_concurrent_probes == 0 {
            return Err(TaskwardenError::Config("max_concurrent_probes must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TaskwardenError::Config(format!("invalid value for {}: {:?}", name, value)))
}
