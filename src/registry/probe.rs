use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Result, TaskwardenError};

/// What an alive probe observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub latency_ms: u64,
    pub status_code: u16,
}

/// Liveness check against a service URL
///
/// `Ok` means the service answered; any `Err` means it should be treated as
/// unhealthy. The registry never lets a probe error escape a health cycle.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeReport>;
}

/// Probes over HTTP: `HEAD <url>`, then `GET <url>/health` if that fails.
/// Any status below 500 counts as alive.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn attempt(&self, request: reqwest::RequestBuilder) -> Result<u16> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        if status < 500 {
            Ok(status)
        } else {
            Err(TaskwardenError::Probe(format!("server answered {}", status)))
        }
    }
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, url: &str) -> Result<ProbeReport> {
        let started = Instant::now();

        let status_code = match self.attempt(self.client.head(url)).await {
            Ok(status) => status,
            Err(head_error) => {
                debug!(url, error = %head_error, "HEAD probe failed, trying /health");
                let health_url = format!("{}/health", url.trim_end_matches('/'));
                self.attempt(self.client.get(&health_url)).await?
            }
        };

        Ok(ProbeReport {
            latency_ms: started.elapsed().as_millis() as u64,
            status_code,
        })
    }
}
