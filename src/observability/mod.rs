//! Process-wide telemetry sink
//!
//! The hub collects counters, gauges and histograms, a bounded structured log
//! buffer, a span stack, named health checks and operator alerts. Both the
//! controller and the registry feed it through [`crate::platform`]. It exports
//! a Prometheus text rendering and a JSON dashboard snapshot.

pub mod alerts;
pub mod health;
pub mod logs;
pub mod metrics;
pub mod spans;

pub use alerts::{Alert, AlertCounts, AlertSeverity, AlertStore};
pub use health::{HealthCheck, HealthRegistry, HealthStatus};
pub use logs::{LogBuffer, LogEntry, LogLevel};
pub use metrics::{labels, HistogramSummary, Labels, MetricPoint, MetricsStore};
pub use spans::{Span, SpanEvent, SpanParent, SpanStatus, SpanStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::ObservabilityConfig;
use crate::error::Result;

/// JSON view of the hub served on the dashboard endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub counters: Vec<MetricPoint>,
    pub gauges: Vec<MetricPoint>,
    pub histograms: Vec<HistogramSummary>,
    pub health: Vec<HealthCheck>,
    pub alerts: AlertCounts,
    pub recent_logs: Vec<LogEntry>,
    pub active_spans: usize,
    pub active_traces: Vec<String>,
    pub recent_traces: Vec<String>,
}

pub struct ObservabilityHub {
    config: ObservabilityConfig,
    metrics: Arc<RwLock<MetricsStore>>,
    logs: Arc<RwLock<LogBuffer>>,
    spans: Arc<RwLock<SpanStore>>,
    alerts: Arc<RwLock<AlertStore>>,
    health: HealthRegistry,
    started_at: DateTime<Utc>,
}

impl ObservabilityHub {
    pub fn new(config: ObservabilityConfig) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(MetricsStore::new(config.histogram_max_samples))),
            logs: Arc::new(RwLock::new(LogBuffer::new(config.max_log_entries))),
            spans: Arc::new(RwLock::new(SpanStore::new(config.max_completed_spans))),
            alerts: Arc::new(RwLock::new(AlertStore::new(config.max_alerts))),
            health: HealthRegistry::new(),
            started_at: Utc::now(),
            config,
        }
    }

    // Metrics

    pub async fn increment_counter(&self, name: &str, value: f64, labels: Labels) {
        self.metrics.write().await.increment_counter(name, value, labels);
    }

    pub async fn set_gauge(&self, name: &str, value: f64, labels: Labels) {
        self.metrics.write().await.set_gauge(name, value, labels);
    }

    pub async fn record_histogram(&self, name: &str, value: f64, labels: Labels) {
        self.metrics.write().await.record_histogram(name, value, labels);
    }

    pub async fn counter(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.metrics.read().await.counter(name, labels)
    }

    pub async fn gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.metrics.read().await.gauge(name, labels)
    }

    pub async fn histogram(&self, name: &str, labels: &Labels) -> Option<HistogramSummary> {
        self.metrics.read().await.histogram(name, labels)
    }

    // Logs

    pub async fn debug(&self, component: &str, message: &str, data: Option<Value>) {
        self.log(LogLevel::Debug, component, message, data).await;
    }

    pub async fn info(&self, component: &str, message: &str, data: Option<Value>) {
        self.log(LogLevel::Info, component, message, data).await;
    }

    pub async fn warn(&self, component: &str, message: &str, data: Option<Value>) {
        self.log(LogLevel::Warn, component, message, data).await;
    }

    pub async fn error(&self, component: &str, message: &str, data: Option<Value>) {
        self.log(LogLevel::Error, component, message, data).await;
    }

    /// Logs at fatal level and raises a critical alert
    pub async fn fatal(&self, component: &str, message: &str, data: Option<Value>) {
        self.log(LogLevel::Fatal, component, message, data).await;
        self.create_alert(
            AlertSeverity::Critical,
            &format!("Fatal error in {}", component),
            message,
            component,
        )
        .await;
    }

    /// Appends a structured entry tagged with the current span and mirrors it to `tracing`
    pub async fn log(&self, level: LogLevel, component: &str, message: &str, data: Option<Value>) {
        let (trace_id, span_id) = {
            let spans = self.spans.read().await;
            match spans.current() {
                Some(span) => (Some(span.trace_id.clone()), Some(span.span_id.clone())),
                None => (None, None),
            }
        };

        match level {
            LogLevel::Debug => tracing::debug!(component, data = ?data, "{}", message),
            LogLevel::Info => tracing::info!(component, data = ?data, "{}", message),
            LogLevel::Warn => tracing::warn!(component, data = ?data, "{}", message),
            LogLevel::Error | LogLevel::Fatal => {
                tracing::error!(component, level = %level, data = ?data, "{}", message)
            }
        }

        self.logs.write().await.push(LogEntry {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.to_string(),
            data,
            trace_id,
            span_id,
        });
    }

    pub async fn recent_logs(&self, limit: usize, min_level: Option<LogLevel>) -> Vec<LogEntry> {
        self.logs.read().await.recent(limit, min_level)
    }

    // Tracing

    /// Starts a span as a child of the current span, if any
    pub async fn start_span(&self, name: &str, attributes: Map<String, Value>) -> Span {
        self.spans.write().await.start(name, attributes, SpanParent::Current)
    }

    /// Starts a span that opens a new trace
    pub async fn start_root_span(&self, name: &str, attributes: Map<String, Value>) -> Span {
        self.spans.write().await.start(name, attributes, SpanParent::Root)
    }

    pub async fn end_span(&self, span_id: &str, status: SpanStatus) -> Option<Span> {
        let span = self.spans.write().await.end(span_id, status)?;
        if let Some(duration) = span.duration_ms {
            self.record_histogram(
                "span_duration_ms",
                duration as f64,
                labels([("span", span.name.as_str())]),
            )
            .await;
        }
        Some(span)
    }

    pub async fn add_span_event(&self, span_id: &str, name: &str, attributes: Map<String, Value>) -> bool {
        self.spans.write().await.add_event(span_id, name, attributes)
    }

    pub async fn current_span(&self) -> Option<Span> {
        self.spans.read().await.current().cloned()
    }

    pub async fn trace(&self, trace_id: &str) -> Vec<Span> {
        self.spans.read().await.trace(trace_id)
    }

    // Health

    pub async fn register_health_check<F, Fut>(&self, name: &str, check_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthStatus>> + Send + 'static,
    {
        self.health.register(name, check_fn).await;
    }

    /// Runs every registered check and publishes a `health_check_up` gauge per check
    pub async fn run_health_checks(&self) -> Vec<HealthCheck> {
        let results = self.health.run_all(self.config.health_check_timeout()).await;
        let mut metrics = self.metrics.write().await;
        for result in &results {
            metrics.set_gauge(
                "health_check_up",
                if result.healthy { 1.0 } else { 0.0 },
                labels([("check", result.name.as_str())]),
            );
        }
        results
    }

    // Alerts

    pub async fn create_alert(&self, severity: AlertSeverity, title: &str, message: &str, source: &str) -> Alert {
        let alert = self.alerts.write().await.create(severity, title, message, source);
        tracing::warn!(severity = %severity, source, title, "alert raised: {}", message);
        alert
    }

    pub async fn acknowledge_alert(&self, id: &str) -> bool {
        self.alerts.write().await.acknowledge(id)
    }

    pub async fn resolve_alert(&self, id: &str) -> bool {
        self.alerts.write().await.resolve(id)
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.active()
    }

    // Exports

    pub async fn export_prometheus(&self) -> String {
        self.metrics.read().await.render_prometheus()
    }

    pub async fn dashboard(&self) -> DashboardSnapshot {
        let (counters, gauges, histograms) = {
            let metrics = self.metrics.read().await;
            (metrics.counters(), metrics.gauges(), metrics.histograms())
        };
        let (active_spans, active_traces, recent_traces) = {
            let spans = self.spans.read().await;
            (spans.active_len(), spans.active_trace_ids(), spans.recent_trace_ids(20))
        };
        let now = Utc::now();

        DashboardSnapshot {
            timestamp: now,
            uptime_secs: (now - self.started_at).num_seconds(),
            counters,
            gauges,
            histograms,
            health: self.health.results().await,
            alerts: self.alerts.read().await.counts(),
            recent_logs: self.recent_logs(self.config.dashboard_recent_logs, None).await,
            active_spans,
            active_traces,
            recent_traces,
        }
    }
}

impl Default for ObservabilityHub {
    fn default() -> Self {
        Self::new(ObservabilityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_logs_carry_current_span() {
        let hub = ObservabilityHub::default();
        let span = hub.start_span("dispatch", Map::new()).await;
        hub.info("controller", "routing", Some(json!({"task": "t1"}))).await;
        hub.end_span(&span.span_id, SpanStatus::Ok).await;
        hub.info("controller", "idle", None).await;

        let logs = hub.recent_logs(10, None).await;
        assert_eq!(logs[0].trace_id.as_deref(), Some(span.trace_id.as_str()));
        assert!(logs[1].trace_id.is_none());
        assert!(hub
            .histogram("span_duration_ms", &labels([("span", "dispatch")]))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_fatal_raises_critical_alert() {
        let hub = ObservabilityHub::default();
        hub.fatal("registry", "probe pool crashed", None).await;

        let active = hub.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(active[0].source, "registry");
        assert!(hub.resolve_alert(&active[0].id).await);
        assert!(hub.active_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_snapshot() {
        let hub = ObservabilityHub::default();
        hub.increment_counter("tasks_submitted_total", 2.0, Labels::new()).await;
        hub.set_gauge("queue_depth", 3.0, Labels::new()).await;
        hub.create_alert(AlertSeverity::Warning, "Service down", "bridge", "registry").await;
        hub.register_health_check("always", || async { Ok(HealthStatus::healthy("ok")) })
            .await;
        let checks = hub.run_health_checks().await;
        assert!(checks[0].healthy);
        let open = hub.start_root_span("request", Map::new()).await;

        let snapshot = hub.dashboard().await;
        assert_eq!(snapshot.counters.len(), 1);
        assert_eq!(snapshot.alerts.warning, 1);
        assert_eq!(snapshot.health.len(), 1);
        assert_eq!(snapshot.active_spans, 1);
        assert_eq!(snapshot.active_traces, vec![open.trace_id]);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["recent_logs"].is_array());

        let text = hub.export_prometheus().await;
        assert!(text.contains("tasks_submitted_total 2"));
        assert!(text.contains("health_check_up{check=\"always\"} 1"));
    }
}
