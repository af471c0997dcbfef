use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;

/// Label set of a metric series. Sorted so series keys are stable.
pub type Labels = BTreeMap<String, String>;

/// Builds a label set from pairs
pub fn labels<I, K, V>(pairs: I) -> Labels
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Latest value of a counter or gauge series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub labels: Labels,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Distribution summary of a histogram series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub name: String,
    pub labels: Labels,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone)]
struct Histogram {
    name: String,
    labels: Labels,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    samples: VecDeque<f64>,
}

impl Histogram {
    fn new(name: &str, labels: Labels) -> Self {
        Self {
            name: name.to_string(),
            labels,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: VecDeque::new(),
        }
    }

    fn record(&mut self, value: f64, max_samples: usize) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.samples.push_back(value);
        while self.samples.len() > max_samples {
            self.samples.pop_front();
        }
    }

    fn summary(&self) -> HistogramSummary {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let percentile = |p: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
            sorted[rank.clamp(1, sorted.len()) - 1]
        };

        HistogramSummary {
            name: self.name.clone(),
            labels: self.labels.clone(),
            count: self.count,
            sum: self.sum,
            min: if self.count == 0 { 0.0 } else { self.min },
            max: if self.count == 0 { 0.0 } else { self.max },
            avg: if self.count == 0 { 0.0 } else { self.sum / self.count as f64 },
            p50: percentile(50.0),
            p95: percentile(95.0),
            p99: percentile(99.0),
        }
    }
}

/// In-memory counters, gauges and histograms keyed by name and labels
#[derive(Debug)]
pub struct MetricsStore {
    counters: BTreeMap<String, MetricPoint>,
    gauges: BTreeMap<String, MetricPoint>,
    histograms: BTreeMap<String, Histogram>,
    max_samples: usize,
}

impl MetricsStore {
    /// Creates an empty store that keeps at most `max_samples` values per histogram
    pub fn new(max_samples: usize) -> Self {
        Self {
            counters: BTreeMap::new(),
            gauges: BTreeMap::new(),
            histograms: BTreeMap::new(),
            max_samples: max_samples.max(1),
        }
    }

    /// Adds `value` to a counter, creating it at zero
    pub fn increment_counter(&mut self, name: &str, value: f64, labels: Labels) {
        let key = series_key(name, &labels);
        let point = self.counters.entry(key).or_insert_with(|| MetricPoint {
            name: name.to_string(),
            labels,
            value: 0.0,
            timestamp: Utc::now(),
        });
        point.value += value;
        point.timestamp = Utc::now();
    }

    /// Sets a gauge to the specified value
    pub fn set_gauge(&mut self, name: &str, value: f64, labels: Labels) {
        let key = series_key(name, &labels);
        self.gauges.insert(
            key,
            MetricPoint {
                name: name.to_string(),
                labels,
                value,
                timestamp: Utc::now(),
            },
        );
    }

    /// Records one observation in a histogram
    pub fn record_histogram(&mut self, name: &str, value: f64, labels: Labels) {
        let key = series_key(name, &labels);
        let max_samples = self.max_samples;
        self.histograms
            .entry(key)
            .or_insert_with(|| Histogram::new(name, labels))
            .record(value, max_samples);
    }

    pub fn counter(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.counters.get(&series_key(name, labels)).map(|p| p.value)
    }

    pub fn gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.gauges.get(&series_key(name, labels)).map(|p| p.value)
    }

    pub fn histogram(&self, name: &str, labels: &Labels) -> Option<HistogramSummary> {
        self.histograms.get(&series_key(name, labels)).map(Histogram::summary)
    }

    pub fn counters(&self) -> Vec<MetricPoint> {
        self.counters.values().cloned().collect()
    }

    pub fn gauges(&self) -> Vec<MetricPoint> {
        self.gauges.values().cloned().collect()
    }

    pub fn histograms(&self) -> Vec<HistogramSummary> {
        self.histograms.values().map(Histogram::summary).collect()
    }

    /// Prometheus text exposition of counters and gauges
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        render_family(&mut out, "counter", self.counters.values());
        render_family(&mut out, "gauge", self.gauges.values());
        out
    }
}

fn render_family<'a, I>(out: &mut String, kind: &str, points: I)
where
    I: Iterator<Item = &'a MetricPoint>,
{
    let mut by_name: BTreeMap<String, Vec<&MetricPoint>> = BTreeMap::new();
    for point in points {
        by_name.entry(sanitize_name(&point.name)).or_default().push(point);
    }

    for (name, points) in by_name {
        let _ = writeln!(out, "# TYPE {} {}", name, kind);
        for point in points {
            let _ = writeln!(out, "{}{} {}", name, render_labels(&point.labels), point.value);
        }
    }
}

fn render_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", sanitize_name(k), escape_label_value(v)))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

fn series_key(name: &str, labels: &Labels) -> String {
    format!("{}{}", name, render_labels(labels))
}

/// Replaces characters Prometheus does not allow in metric and label names
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if sanitized.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
