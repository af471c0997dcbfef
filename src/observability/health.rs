use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::Result;

/// What a health check reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Result of the last run of a named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub healthy: bool,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<HealthStatus>> + Send + Sync>;

/// Named asynchronous health checks
#[derive(Default)]
pub struct HealthRegistry {
    checks: RwLock<BTreeMap<String, CheckFn>>,
    last_results: RwLock<BTreeMap<String, HealthCheck>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a check under `name`
    pub async fn register<F, Fut>(&self, name: &str, check_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthStatus>> + Send + 'static,
    {
        let check: CheckFn = Arc::new(move || Box::pin(check_fn()));
        self.checks.write().await.insert(name.to_string(), check);
    }

    /// Runs every check concurrently. A check that errors or exceeds `timeout` is unhealthy.
    pub async fn run_all(&self, timeout: Duration) -> Vec<HealthCheck> {
        let checks: Vec<(String, CheckFn)> = self
            .checks
            .read()
            .await
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let runs = checks.into_iter().map(|(name, check)| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, check()).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let status = match outcome {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => HealthStatus::unhealthy(format!("check failed: {}", e)),
                Err(_) => HealthStatus::unhealthy(format!("check timed out after {:?}", timeout)),
            };

            HealthCheck {
                name,
                healthy: status.healthy,
                message: status.message,
                details: status.details,
                latency_ms,
                checked_at: Utc::now(),
            }
        });

        let results = join_all(runs).await;

        let mut last = self.last_results.write().await;
        for result in &results {
            last.insert(result.name.clone(), result.clone());
        }
        results
    }

    /// Results of the latest run of each check
    pub async fn results(&self) -> Vec<HealthCheck> {
        self.last_results.read().await.values().cloned().collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.checks.read().await.keys().cloned().collect()
    }
}
