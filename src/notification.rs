//! Notification collaborator contract
//!
//! The core only decides *that* something is worth telling someone. Channel
//! specific formatting lives behind this trait.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{TaskwardenError, Result};
use crate::utils::with_retry;

/// Receives named events with a JSON payload
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one event. Errors are reported to the caller, who decides whether they matter.
    async fn notify_event(&self, event: &str, payload: Value) -> Result<()>;
}

/// Writes notifications to the process log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_event(&self, event: &str, payload: Value) -> Result<()> {
        info!(target: "taskwarden::notification", event, %payload, "notification");
        Ok(())
    }
}

/// POSTs `{event, payload, timestamp}` to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl WebhookNotifier {
    /// Creates a notifier for the given URL with three delivery attempts
    pub fn new(url: &str) -> Result<Self> {
        url::Url::parse(url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            attempts: 3,
            backoff: Duration::from_millis(250),
        })
    }

    /// Overrides the delivery attempts and linear backoff step
    pub fn with_retry_policy(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }

    async fn deliver(&self, body: &Value) -> Result<()> {
        let response = self.client.post(&self.url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(TaskwardenError::Network(format!(
                "webhook {} answered {}",
                self.url, status
            )))
        } else {
            Err(TaskwardenError::Notification(format!(
                "webhook {} answered {}",
                self.url, status
            )))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_event(&self, event: &str, payload: Value) -> Result<()> {
        let body = json!({
            "event": event,
            "payload": payload,
            "timestamp": Utc::now().to_rfc3339(),
        });

        with_retry(
            || self.deliver(&body),
            self.attempts,
            self.backoff,
            TaskwardenError::is_transient,
        )
        .await
            .map_err(|e| {
                warn!("Webhook notification {} failed: {}", event, e);
                e
            })
    }
}
