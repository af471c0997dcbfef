//! One-shot wiring of the controller, registry, observability hub and notifier
//!
//! The host process builds a [`Platform`] once and owns it. Nothing here is
//! global: two platforms in one process are fully independent.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, EnvSnapshot};
use crate::controller::{ControllerEvent, TaskController};
use crate::error::{Result, TaskwardenError};
use crate::notification::{Notifier, TracingNotifier, WebhookNotifier};
use crate::observability::{labels, AlertSeverity, HealthStatus, Labels, ObservabilityHub};
use crate::registry::{ConfigEventKind, HealthProber, RegistryEvent, ServiceRegistry};

pub struct Platform {
    config: Config,
    hub: Arc<ObservabilityHub>,
    controller: TaskController,
    registry: ServiceRegistry,
    notifier: Arc<dyn Notifier>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

pub struct PlatformBuilder {
    config: Config,
    env: Option<EnvSnapshot>,
    prober: Option<Arc<dyn HealthProber>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PlatformBuilder {
    pub fn env(mut self, env: EnvSnapshot) -> Self {
        self.env = Some(env);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn HealthProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Builds every component. The notifier defaults to the configured
    /// webhook, or to the log when none is set.
    pub fn build(self) -> Result<Platform> {
        let config = self.config;
        config.validate()?;

        let notifier: Arc<dyn Notifier> = match (self.notifier, &config.server.notify_webhook) {
            (Some(notifier), _) => notifier,
            (None, Some(url)) => Arc::new(WebhookNotifier::new(url)?),
            (None, None) => Arc::new(TracingNotifier),
        };

        let mut registry = ServiceRegistry::builder(config.registry.clone())
            .notifier(Arc::clone(&notifier))
            .env(self.env.unwrap_or_else(EnvSnapshot::from_process));
        if let Some(prober) = self.prober {
            registry = registry.prober(prober);
        }

        Ok(Platform {
            hub: Arc::new(ObservabilityHub::new(config.observability.clone())),
            controller: TaskController::new(config.controller.clone())?,
            registry: registry.build()?,
            notifier,
            forwarders: Mutex::new(Vec::new()),
            config,
        })
    }
}

impl Platform {
    pub fn builder(config: Config) -> PlatformBuilder {
        PlatformBuilder {
            config,
            env: None,
            prober: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hub(&self) -> &Arc<ObservabilityHub> {
        &self.hub
    }

    pub fn controller(&self) -> &TaskController {
        &self.controller
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Connects the event forwarders and health checks, then starts the
    /// controller loops and the registry startup phases
    pub async fn start(&self) -> Result<()> {
        {
            let mut forwarders = self.forwarders.lock().await;
            if forwarders.is_empty() {
                forwarders.push(tokio::spawn(forward_controller_events(
                    self.controller.subscribe(),
                    Arc::clone(&self.hub),
                    Arc::clone(&self.notifier),
                )));
                forwarders.push(tokio::spawn(forward_registry_events(
                    self.registry.subscribe(),
                    self.registry.clone(),
                    Arc::clone(&self.hub),
                )));
                self.register_health_checks().await;
            }
        }

        self.controller.start().await;
        self.registry.start().await?;
        self.hub.info("platform", "platform started", None).await;
        Ok(())
    }

    pub async fn stop(&self) {
        self.controller.stop().await;
        self.registry.stop().await;
        self.hub.info("platform", "platform stopped", None).await;
    }

    async fn register_health_checks(&self) {
        let controller = self.controller.clone();
        self.hub
            .register_health_check("controller", move || {
                let controller = controller.clone();
                async move {
                    let status = controller.status().await;
                    let details = json!({ "queued": status.queued, "active": status.active, "mode": status.mode });
                    Ok::<_, TaskwardenError>(if status.running {
                        HealthStatus::healthy("dispatching").with_details(details)
                    } else {
                        HealthStatus::unhealthy("controller stopped").with_details(details)
                    })
                }
            })
            .await;

        let registry = self.registry.clone();
        self.hub
            .register_health_check("registry", move || {
                let registry = registry.clone();
                async move {
                    let status = registry.status().await;
                    let message = format!("{}/{} endpoints healthy", status.healthy, status.total);
                    let details = serde_json::to_value(&status).unwrap_or_default();
                    Ok::<_, TaskwardenError>(if status.running {
                        HealthStatus::healthy(message).with_details(details)
                    } else {
                        HealthStatus::unhealthy("registry stopped").with_details(details)
                    })
                }
            })
            .await;
    }
}

async fn forward_controller_events(
    mut events: UnboundedReceiver<ControllerEvent>,
    hub: Arc<ObservabilityHub>,
    notifier: Arc<dyn Notifier>,
) {
    const COMPONENT: &str = "controller";

    while let Some(event) = events.recv().await {
        let type_labels = |task: &crate::task::Task| labels([("type", task.task_type.as_str())]);

        match &event {
            ControllerEvent::Started | ControllerEvent::Stopped => {
                hub.info(COMPONENT, &format!("controller {}", event.name()), None).await;
            }
            ControllerEvent::TaskQueued(task) => {
                hub.increment_counter("tasks_queued_total", 1.0, type_labels(task)).await;
            }
            ControllerEvent::TaskStarted { task, capability_id } => {
                hub.increment_counter(
                    "tasks_started_total",
                    1.0,
                    labels([("type", task.task_type.as_str()), ("capability", capability_id.as_str())]),
                )
                .await;
            }
            ControllerEvent::TaskCompleted { task, duration_ms } => {
                hub.increment_counter("tasks_completed_total", 1.0, type_labels(task)).await;
                hub.record_histogram("task_duration_ms", *duration_ms as f64, type_labels(task))
                    .await;
            }
            ControllerEvent::TaskFailed(task) => {
                hub.increment_counter("tasks_failed_total", 1.0, type_labels(task)).await;
                let payload = json!({
                    "task_id": task.id,
                    "type": task.task_type,
                    "error": task.error,
                    "retry_count": task.retry_count,
                    "assigned_to": task.assigned_to,
                });
                hub.error(COMPONENT, "task failed", Some(payload.clone())).await;
                if let Err(e) = notifier.notify_event("task_failed", payload).await {
                    warn!(task_id = %task.id, error = %e, "task_failed notification failed");
                }
            }
            ControllerEvent::TaskCancelled(task) => {
                hub.increment_counter("tasks_cancelled_total", 1.0, type_labels(task)).await;
            }
            ControllerEvent::TaskTimeout(task) => {
                hub.increment_counter("tasks_timeout_total", 1.0, type_labels(task)).await;
                hub.warn(COMPONENT, "task timed out in queue", Some(json!({ "task_id": task.id })))
                    .await;
            }
            ControllerEvent::TaskFiltered { task, reason } => {
                hub.increment_counter("tasks_filtered_total", 1.0, type_labels(task)).await;
                hub.info(COMPONENT, "task filtered", Some(json!({ "task_id": task.id, "reason": reason })))
                    .await;
            }
            ControllerEvent::Decision(decision) => {
                hub.increment_counter(
                    "decisions_total",
                    1.0,
                    labels([("type", decision.decision_type.as_str()), ("source", COMPONENT)]),
                )
                .await;
                hub.info(COMPONENT, &decision.reason, serde_json::to_value(decision).ok())
                    .await;
            }
            ControllerEvent::ModeChanged { previous, mode } => {
                hub.info(COMPONENT, &format!("mode changed from {} to {}", previous, mode), None)
                    .await;
            }
            ControllerEvent::ConfigUpdated(config) => {
                hub.info(COMPONENT, "config updated", serde_json::to_value(config).ok()).await;
            }
            ControllerEvent::CapabilityRegistered(capability) => {
                hub.info(COMPONENT, &format!("capability {} registered", capability.id), None)
                    .await;
            }
            ControllerEvent::HealthCheck(status) => {
                hub.set_gauge("queue_depth", status.queued as f64, Labels::new()).await;
                hub.set_gauge("active_tasks", status.active as f64, Labels::new()).await;
                for capability in &status.capabilities {
                    let capability_labels = labels([("capability", capability.id.as_str())]);
                    hub.set_gauge("capability_success_rate", capability.success_rate, capability_labels.clone())
                        .await;
                    hub.set_gauge("capability_load", f64::from(capability.current_load), capability_labels.clone())
                        .await;
                    hub.set_gauge(
                        "capability_enabled",
                        if capability.enabled { 1.0 } else { 0.0 },
                        capability_labels,
                    )
                    .await;
                }
            }
            ControllerEvent::Log { level, message } => {
                hub.log(*level, COMPONENT, message, None).await;
            }
        }
    }
}

async fn forward_registry_events(
    mut events: UnboundedReceiver<RegistryEvent>,
    registry: ServiceRegistry,
    hub: Arc<ObservabilityHub>,
) {
    const COMPONENT: &str = "registry";

    while let Some(event) = events.recv().await {
        match event {
            RegistryEvent::Started { endpoints } => {
                hub.info(COMPONENT, &format!("registry started with {} endpoint(s)", endpoints), None)
                    .await;
            }
            RegistryEvent::Stopped => hub.info(COMPONENT, "registry stopped", None).await,
            RegistryEvent::ConfigEvent(config_event) => {
                hub.increment_counter(
                    "registry_events_total",
                    1.0,
                    labels([("kind", config_event.kind.as_str())]),
                )
                .await;

                let data = serde_json::to_value(&config_event).ok();
                match config_event.kind {
                    ConfigEventKind::Disconnected => {
                        hub.warn(COMPONENT, &config_event.message, data).await;
                        hub.create_alert(
                            AlertSeverity::Warning,
                            &format!("Service {} disconnected", config_event.endpoint_id),
                            &config_event.message,
                            COMPONENT,
                        )
                        .await;
                    }
                    ConfigEventKind::Healed => {
                        hub.info(COMPONENT, &config_event.message, data).await;
                        hub.create_alert(
                            AlertSeverity::Info,
                            &format!("Service {} healed", config_event.endpoint_id),
                            &config_event.message,
                            COMPONENT,
                        )
                        .await;
                    }
                    ConfigEventKind::Error => hub.warn(COMPONENT, &config_event.message, data).await,
                    _ => hub.debug(COMPONENT, &config_event.message, data).await,
                }

                let status = registry.status().await;
                hub.set_gauge("services_total", status.total as f64, Labels::new()).await;
                hub.set_gauge("services_healthy", status.healthy as f64, Labels::new()).await;
                hub.set_gauge("services_unhealthy", status.unhealthy as f64, Labels::new()).await;
            }
            RegistryEvent::Decision(decision) => {
                hub.increment_counter(
                    "decisions_total",
                    1.0,
                    labels([("type", decision.decision_type.as_str()), ("source", COMPONENT)]),
                )
                .await;
                hub.info(COMPONENT, &decision.reason, serde_json::to_value(&decision).ok())
                    .await;
            }
            RegistryEvent::Notification { event, payload } => {
                hub.increment_counter("notifications_total", 1.0, labels([("event", event.as_str())]))
                    .await;
                info!(event = %event, "registry notification sent");
                hub.debug(COMPONENT, &format!("notification {}", event), Some(payload)).await;
            }
            RegistryEvent::Log { level, message } => hub.log(level, COMPONENT, &message, None).await,
        }
    }
}
