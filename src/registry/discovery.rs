use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::endpoint::{EndpointStatus, ServiceEndpoint, ServiceType};
use super::probe::HealthProber;
use crate::config::{EnvSnapshot, RegistryConfig, SERVICE_ENV_VARS};
use crate::parallel::ParallelProcessor;

/// Endpoints named by service-URL environment variables, in table order
///
/// Every set variable yields its own endpoint, so two variables of the same
/// family produce two entries.
pub fn env_endpoints(env: &EnvSnapshot) -> Vec<ServiceEndpoint> {
    SERVICE_ENV_VARS
        .iter()
        .filter_map(|var| {
            let url = env.get(var.name)?;
            Some(
                ServiceEndpoint::new(env_endpoint_id(var.name), var.label, var.service_type, url)
                    .with_config(json!({ "source": "env", "variable": var.name })),
            )
        })
        .collect()
}

/// `VOICE_SERVICE_URL` becomes `env-voice-service-url`
pub fn env_endpoint_id(variable: &str) -> String {
    format!("env-{}", variable.to_ascii_lowercase().replace('_', "-"))
}

/// One host/port pair probed during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryTarget {
    pub service_type: ServiceType,
    pub host: String,
    pub port: u16,
}

impl DiscoveryTarget {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn endpoint_id(&self) -> String {
        format!("auto-{}-{}-{}", self.service_type, self.host, self.port)
    }
}

/// The host × port matrix from the registry config
pub fn discovery_targets(config: &RegistryConfig) -> Vec<DiscoveryTarget> {
    config
        .discovery_hosts
        .iter()
        .flat_map(|host| {
            config.discovery_ports.iter().map(move |port| DiscoveryTarget {
                service_type: port.service_type,
                host: host.clone(),
                port: port.port,
            })
        })
        .collect()
}

/// Probes every target whose URL is not already known, concurrently, and
/// returns an endpoint for each one that answered
pub async fn discover(
    prober: Arc<dyn HealthProber>,
    targets: Vec<DiscoveryTarget>,
    known_urls: &HashSet<String>,
    parallel: &ParallelProcessor,
) -> Vec<ServiceEndpoint> {
    let targets: Vec<DiscoveryTarget> = targets
        .into_iter()
        .filter(|target| !known_urls.contains(&target.url()))
        .collect();

    let probes = targets
        .iter()
        .cloned()
        .map(|target| {
            let prober = Arc::clone(&prober);
            async move { prober.probe(&target.url()).await }
        })
        .collect();

    let mut found = Vec::new();
    for (target, outcome) in targets.into_iter().zip(parallel.process(probes).await) {
        match outcome {
            Ok(Ok(report)) => {
                let now = chrono::Utc::now();
                let mut endpoint = ServiceEndpoint::new(
                    target.endpoint_id(),
                    format!("{} ({}:{})", target.service_type.label(), target.host, target.port),
                    target.service_type,
                    target.url(),
                );
                endpoint.status = EndpointStatus::Healthy;
                endpoint.last_check = Some(now);
                endpoint.last_seen = Some(now);
                endpoint.latency_ms = Some(report.latency_ms);
                endpoint.auto_discovered = true;
                found.push(endpoint);
            }
            Ok(Err(e)) => debug!(url = %target.url(), error = %e, "nothing listening"),
            Err(e) => debug!(url = %target.url(), error = %e, "discovery probe aborted"),
        }
    }
    found
}
