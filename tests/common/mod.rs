#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

use taskwarden::config::{ControllerConfig, RegistryConfig};
use taskwarden::registry::{HealthProber, ProbeReport};
use taskwarden::{Capability, CapabilityExecutor, Notifier, Result, Task, TaskwardenError};

pub mod test_helpers {
    use super::*;

    /// Controller with no built-in capabilities and a health loop that never fires on its own
    pub fn create_test_controller_config() -> ControllerConfig {
        ControllerConfig {
            register_default_capabilities: false,
            max_retries: 0,
            dispatch_interval_ms: 10,
            health_interval_ms: 3_600_000,
            ..ControllerConfig::default()
        }
    }

    /// Registry that only knows what a test registers or injects
    pub fn create_test_registry_config() -> RegistryConfig {
        RegistryConfig {
            auto_discovery: false,
            auto_connect: true,
            health_check_interval_ms: 3_600_000,
            probe_timeout_ms: 200,
            discovery_hosts: Vec::new(),
            discovery_ports: Vec::new(),
            ..RegistryConfig::default()
        }
    }

    /// Polls `condition` every 10 ms for up to five seconds
    pub async fn wait_until<F, Fut>(mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub fn setup_test_logger() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("taskwarden=debug")
            .with_test_writer()
            .try_init();
    }
}

/// Succeeds immediately and remembers which tasks it ran, in order
#[derive(Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityExecutor for RecordingExecutor {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value> {
        self.runs.lock().unwrap().push(task.id.clone());
        Ok(json!({ "ran_on": capability.id }))
    }
}

/// Holds every execution until the test hands out permits
pub struct BlockingExecutor {
    gate: Semaphore,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl BlockingExecutor {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Lets `n` executions finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of executions observed in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityExecutor for BlockingExecutor {
    async fn execute(&self, _task: &Task, _capability: &Capability) -> Result<Value> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TaskwardenError::execution(e.to_string()))?;
        permit.forget();
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "released": true }))
    }
}

/// Always fails and counts its attempts
#[derive(Default)]
pub struct FailingExecutor {
    attempts: AtomicUsize,
}

impl FailingExecutor {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityExecutor for FailingExecutor {
    async fn execute(&self, _task: &Task, _capability: &Capability) -> Result<Value> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TaskwardenError::execution("backend unavailable"))
    }
}

pub struct PanickingExecutor;

#[async_trait]
impl CapabilityExecutor for PanickingExecutor {
    async fn execute(&self, _task: &Task, _capability: &Capability) -> Result<Value> {
        panic!("executor blew up");
    }
}

/// Answers probes from a per-URL script. Unknown URLs are down.
#[derive(Default)]
pub struct ScriptedProber {
    script: Mutex<HashMap<String, Option<u64>>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn set_up(&self, url: &str, latency_ms: u64) {
        self.script.lock().unwrap().insert(url.to_string(), Some(latency_ms));
    }

    pub fn set_down(&self, url: &str) {
        self.script.lock().unwrap().insert(url.to_string(), None);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, url: &str) -> Result<ProbeReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().get(url).copied().flatten() {
            Some(latency_ms) => Ok(ProbeReport {
                latency_ms,
                status_code: 200,
            }),
            None => Err(TaskwardenError::Probe(format!("{} refused connection", url))),
        }
    }
}

/// Keeps every notification it receives
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Value)>>,
    delay: Duration,
}

impl RecordingNotifier {
    /// Notifier that takes `delay` to deliver each event
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.sent().into_iter().map(|(event, _)| event).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_event(&self, event: &str, payload: Value) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }
}
