//! Service registry and health monitor
//!
//! Keeps the set of backing-service endpoints, loaded from the environment or
//! found by probing well-known ports, and re-probes them on an interval.
//! Recoveries produce `healed` events and heal decisions. Failures produce
//! `disconnected` events and a `service_down` notification.

pub mod discovery;
pub mod endpoint;
pub mod events;
pub mod probe;

pub use discovery::{discovery_targets, env_endpoint_id, env_endpoints, DiscoveryTarget};
pub use endpoint::{EndpointStatus, ServiceEndpoint, ServiceType};
pub use events::{ConfigEvent, ConfigEventKind, RegistryEvent};
pub use probe::{HealthProber, HttpProber, ProbeReport};

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{credential_flags, CredentialFlag, EnvSnapshot, RegistryConfig};
use crate::decision::{Decision, DecisionLog, DecisionType};
use crate::error::{Result, TaskwardenError};
use crate::events::EventBus;
use crate::notification::{Notifier, TracingNotifier};
use crate::observability::LogLevel;
use crate::parallel::ParallelProcessor;

/// Outcome of probing one endpoint during a health cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCheck {
    pub id: String,
    pub name: String,
    pub url: String,
    pub previous: EndpointStatus,
    pub status: EndpointStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Which pass is probing. The startup auto-connect pass reports first
/// contact as `connected`; periodic cycles report any recovery as `healed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbePass {
    Connect,
    Cycle,
}

/// Endpoint counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub running: bool,
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// Handle to the registry. Clones share state.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    env: EnvSnapshot,
    prober: Arc<dyn HealthProber>,
    notifier: Arc<dyn Notifier>,
    parallel: ParallelProcessor,
    endpoints: RwLock<BTreeMap<String, ServiceEndpoint>>,
    primaries: RwLock<HashMap<ServiceType, String>>,
    decisions: Mutex<DecisionLog>,
    events: EventBus<RegistryEvent>,
    health_loop: Mutex<Option<JoinHandle<()>>>,
}

pub struct ServiceRegistryBuilder {
    config: RegistryConfig,
    prober: Option<Arc<dyn HealthProber>>,
    notifier: Option<Arc<dyn Notifier>>,
    env: Option<EnvSnapshot>,
}

impl ServiceRegistryBuilder {
    pub fn prober(mut self, prober: Arc<dyn HealthProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Environment used by the startup load. Defaults to the process environment.
    pub fn env(mut self, env: EnvSnapshot) -> Self {
        self.env = Some(env);
        self
    }

    pub fn build(self) -> Result<ServiceRegistry> {
        let prober = match self.prober {
            Some(prober) => prober,
            None => Arc::new(HttpProber::new(self.config.probe_timeout())?),
        };
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        Ok(ServiceRegistry {
            inner: Arc::new(RegistryInner {
                parallel: ParallelProcessor::new(self.config.max_concurrent_probes),
                config: self.config,
                env: self.env.unwrap_or_else(EnvSnapshot::from_process),
                prober,
                notifier,
                endpoints: RwLock::new(BTreeMap::new()),
                primaries: RwLock::new(HashMap::new()),
                decisions: Mutex::new(DecisionLog::new()),
                events: EventBus::new(),
                health_loop: Mutex::new(None),
            }),
        })
    }
}

impl ServiceRegistry {
    pub fn builder(config: RegistryConfig) -> ServiceRegistryBuilder {
        ServiceRegistryBuilder {
            config,
            prober: None,
            notifier: None,
            env: None,
        }
    }

    /// Registry with the HTTP prober, log notifier and process environment
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> UnboundedReceiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Runs the startup phases in order: environment load, discovery,
    /// auto-connect, then the periodic health loop
    pub async fn start(&self) -> Result<()> {
        if self.is_running().await {
            warn!("service registry already running");
            return Ok(());
        }

        let loaded = self.load_from_env().await;
        self.log(LogLevel::Info, format!("loaded {} endpoint(s) from environment", loaded));

        if self.inner.config.auto_discovery {
            let found = self.discover().await;
            self.log(LogLevel::Info, format!("discovered {} endpoint(s)", found.len()));
        }

        if self.inner.config.auto_connect {
            let pending: Vec<String> = self
                .inner
                .endpoints
                .read()
                .await
                .values()
                .filter(|e| e.status != EndpointStatus::Healthy)
                .map(|e| e.id.clone())
                .collect();
            self.check_endpoints(&pending, ProbePass::Connect).await;
        }

        let handle = spawn_health_loop(Arc::downgrade(&self.inner), self.inner.config.health_check_interval());
        *self.inner.health_loop.lock().await = Some(handle);

        let endpoints = self.inner.endpoints.read().await.len();
        info!(endpoints, "service registry started");
        self.inner.events.emit(RegistryEvent::Started { endpoints });
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.inner.health_loop.lock().await.take() {
            handle.abort();
            info!("service registry stopped");
            self.inner.events.emit(RegistryEvent::Stopped);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.health_loop.lock().await.is_some()
    }

    /// Registers every endpoint named by a service-URL variable. The first one
    /// per service type becomes that type's primary endpoint.
    pub async fn load_from_env(&self) -> usize {
        let loaded = env_endpoints(&self.inner.env);
        let count = loaded.len();

        for endpoint in loaded {
            self.inner
                .primaries
                .write()
                .await
                .entry(endpoint.service_type)
                .or_insert_with(|| endpoint.id.clone());

            let event = ConfigEvent::new(
                ConfigEventKind::Discovered,
                &endpoint.id,
                format!("{} loaded from environment", endpoint.url),
            );
            self.inner.endpoints.write().await.insert(endpoint.id.clone(), endpoint);
            self.inner.events.emit(RegistryEvent::ConfigEvent(event));
        }
        count
    }

    /// Probes the discovery matrix and registers every endpoint that answers
    pub async fn discover(&self) -> Vec<ServiceEndpoint> {
        let known: HashSet<String> = self
            .inner
            .endpoints
            .read()
            .await
            .values()
            .map(|e| e.url.clone())
            .collect();

        let found = discovery::discover(
            Arc::clone(&self.inner.prober),
            discovery_targets(&self.inner.config),
            &known,
            &self.inner.parallel,
        )
        .await;

        for endpoint in &found {
            info!(id = %endpoint.id, url = %endpoint.url, "discovered service");
            self.inner
                .endpoints
                .write()
                .await
                .insert(endpoint.id.clone(), endpoint.clone());
            self.inner.events.emit(RegistryEvent::ConfigEvent(ConfigEvent::new(
                ConfigEventKind::Discovered,
                &endpoint.id,
                format!("{} answered on {}", endpoint.service_type.label(), endpoint.url),
            )));
        }
        found
    }

    /// Adds or replaces an endpoint. The stored record always starts over in `unknown`.
    pub async fn register_service(&self, mut endpoint: ServiceEndpoint) -> ServiceEndpoint {
        endpoint.status = EndpointStatus::Unknown;
        endpoint.last_check = None;

        self.inner
            .endpoints
            .write()
            .await
            .insert(endpoint.id.clone(), endpoint.clone());

        debug!(id = %endpoint.id, url = %endpoint.url, "service registered");
        self.inner.events.emit(RegistryEvent::ConfigEvent(ConfigEvent::new(
            ConfigEventKind::ConfigChanged,
            &endpoint.id,
            format!("registered {}", endpoint.url),
        )));
        endpoint
    }

    pub async fn services(&self) -> Vec<ServiceEndpoint> {
        self.inner.endpoints.read().await.values().cloned().collect()
    }

    pub async fn service(&self, id: &str) -> Option<ServiceEndpoint> {
        self.inner.endpoints.read().await.get(id).cloned()
    }

    /// The first environment-loaded endpoint of a type
    pub async fn primary_endpoint(&self, service_type: ServiceType) -> Option<ServiceEndpoint> {
        let id = self.inner.primaries.read().await.get(&service_type).cloned()?;
        self.service(&id).await
    }

    pub async fn decisions(&self, limit: usize) -> Vec<Decision> {
        self.inner.decisions.lock().await.recent(limit)
    }

    pub fn credential_flags(&self) -> Vec<CredentialFlag> {
        credential_flags(&self.inner.env)
    }

    pub async fn status(&self) -> RegistryStatus {
        let running = self.is_running().await;
        let endpoints = self.inner.endpoints.read().await;
        let mut status = RegistryStatus {
            running,
            total: endpoints.len(),
            ..RegistryStatus::default()
        };
        for endpoint in endpoints.values() {
            match endpoint.status {
                EndpointStatus::Healthy => status.healthy += 1,
                EndpointStatus::Degraded => status.degraded += 1,
                EndpointStatus::Unhealthy => status.unhealthy += 1,
                EndpointStatus::Unknown | EndpointStatus::Checking => status.unknown += 1,
            }
        }
        status
    }

    /// Runs one health cycle over every endpoint
    pub async fn check_all(&self) -> Vec<EndpointCheck> {
        let ids: Vec<String> = self.inner.endpoints.read().await.keys().cloned().collect();
        self.check_endpoints(&ids, ProbePass::Cycle).await
    }

    /// Probes the given endpoints concurrently and applies status transitions.
    /// `service_down` notifications go out together once every transition is applied.
    async fn check_endpoints(&self, ids: &[String], pass: ProbePass) -> Vec<EndpointCheck> {
        let targets: Vec<(String, String, EndpointStatus)> = {
            let mut endpoints = self.inner.endpoints.write().await;
            ids.iter()
                .filter_map(|id| {
                    let endpoint = endpoints.get_mut(id)?;
                    let previous = endpoint.status;
                    endpoint.status = EndpointStatus::Checking;
                    Some((endpoint.id.clone(), endpoint.url.clone(), previous))
                })
                .collect()
        };

        // HEAD and the /health fallback may each take the full probe timeout.
        let deadline = self.inner.config.probe_timeout() * 2;
        let probes = targets
            .iter()
            .map(|(_, url, _)| {
                let prober = Arc::clone(&self.inner.prober);
                let url = url.clone();
                async move {
                    match tokio::time::timeout(deadline, prober.probe(&url)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(TaskwardenError::Probe(format!("no answer within {:?}", deadline))),
                    }
                }
            })
            .collect();
        let outcomes = self.inner.parallel.process(probes).await;

        let mut checks = Vec::with_capacity(targets.len());
        let mut down = Vec::new();
        for ((id, _, previous), outcome) in targets.into_iter().zip(outcomes) {
            let outcome = outcome.and_then(|probe| probe);
            if let Some((check, endpoint)) = self.apply_probe(&id, previous, outcome, pass).await {
                if let Some(endpoint) = endpoint {
                    down.push(endpoint);
                }
                checks.push(check);
            }
        }

        join_all(down.iter().map(|endpoint| self.notify_down(endpoint))).await;
        checks
    }

    async fn apply_probe(
        &self,
        id: &str,
        previous: EndpointStatus,
        outcome: Result<ProbeReport>,
        pass: ProbePass,
    ) -> Option<(EndpointCheck, Option<ServiceEndpoint>)> {
        let now = Utc::now();
        let (endpoint, error) = {
            let mut endpoints = self.inner.endpoints.write().await;
            let endpoint = endpoints.get_mut(id)?;
            endpoint.last_check = Some(now);

            let error = match &outcome {
                Ok(report) => {
                    let degraded = self
                        .inner
                        .config
                        .degraded_latency_ms
                        .map_or(false, |threshold| report.latency_ms > threshold);
                    endpoint.status = if degraded {
                        EndpointStatus::Degraded
                    } else {
                        EndpointStatus::Healthy
                    };
                    endpoint.latency_ms = Some(report.latency_ms);
                    endpoint.last_seen = Some(now);
                    None
                }
                Err(e) => {
                    endpoint.status = EndpointStatus::Unhealthy;
                    endpoint.latency_ms = None;
                    Some(e.to_string())
                }
            };
            (endpoint.clone(), error)
        };

        let went_down = self.on_transition(&endpoint, previous, error.as_deref(), pass).await;

        let check = EndpointCheck {
            id: endpoint.id.clone(),
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            previous,
            status: endpoint.status,
            latency_ms: endpoint.latency_ms,
            error,
        };
        Some((check, went_down.then_some(endpoint)))
    }

    /// Emits the config event for a status change. Returns true when the
    /// endpoint just went down and needs a `service_down` notification.
    async fn on_transition(
        &self,
        endpoint: &ServiceEndpoint,
        previous: EndpointStatus,
        error: Option<&str>,
        pass: ProbePass,
    ) -> bool {
        use EndpointStatus::*;

        match (previous, endpoint.status) {
            (Unknown | Checking, Healthy | Degraded) if pass == ProbePass::Connect => {
                self.emit_config(ConfigEventKind::Connected, endpoint, "service reachable");
            }
            (Unknown | Checking, Degraded) => {
                self.emit_config(ConfigEventKind::Connected, endpoint, "service reachable but slow");
            }
            (Unknown | Checking | Unhealthy | Degraded, Healthy) => {
                info!(id = %endpoint.id, url = %endpoint.url, "service recovered");
                self.emit_config(ConfigEventKind::Healed, endpoint, "service recovered");
                if self.inner.config.auto_heal {
                    let decision = self.inner.decisions.lock().await.record(
                        DecisionType::Heal,
                        format!("Service {} recovered", endpoint.name),
                        json!({ "endpoint": endpoint.id, "previous": previous }),
                        json!({ "status": endpoint.status, "latency_ms": endpoint.latency_ms }),
                        false,
                    );
                    self.inner.events.emit(RegistryEvent::Decision(decision));
                }
            }
            (Healthy, Degraded) => {
                self.log(
                    LogLevel::Warn,
                    format!("{} is slow ({:?} ms)", endpoint.name, endpoint.latency_ms),
                );
            }
            (Healthy | Degraded, Unhealthy) => {
                warn!(id = %endpoint.id, url = %endpoint.url, error, "service went down");
                self.emit_config(
                    ConfigEventKind::Disconnected,
                    endpoint,
                    error.unwrap_or("service unreachable"),
                );
                return true;
            }
            (Unknown | Checking, Unhealthy) => {
                self.emit_config(
                    ConfigEventKind::Error,
                    endpoint,
                    error.unwrap_or("service unreachable"),
                );
            }
            _ => {}
        }
        false
    }

    async fn notify_down(&self, endpoint: &ServiceEndpoint) {
        let payload = json!({
            "id": endpoint.id,
            "name": endpoint.name,
            "type": endpoint.service_type,
            "url": endpoint.url,
            "last_seen": endpoint.last_seen,
        });

        self.inner.events.emit(RegistryEvent::Notification {
            event: "service_down".to_string(),
            payload: payload.clone(),
        });

        if let Err(e) = self.inner.notifier.notify_event("service_down", payload).await {
            warn!(id = %endpoint.id, error = %e, "service_down notification failed");
            self.log(LogLevel::Error, format!("notification for {} failed: {}", endpoint.id, e));
        }
    }

    fn emit_config(&self, kind: ConfigEventKind, endpoint: &ServiceEndpoint, message: &str) {
        self.inner
            .events
            .emit(RegistryEvent::ConfigEvent(ConfigEvent::new(kind, &endpoint.id, message)));
    }

    fn log(&self, level: LogLevel, message: String) {
        debug!(%level, "{}", message);
        self.inner.events.emit(RegistryEvent::Log { level, message });
    }
}

fn spawn_health_loop(inner: Weak<RegistryInner>, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already probed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => break,
            };
            let checks = ServiceRegistry { inner }.check_all().await;
            debug!(checked = checks.len(), "registry health cycle done");
        }
    })
}
