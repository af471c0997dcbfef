use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        })
    }
}

/// Operator-facing notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Number of unresolved alerts per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

#[derive(Debug)]
pub struct AlertStore {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Raises an alert. When full, the oldest resolved alert is dropped first.
    pub fn create(&mut self, severity: AlertSeverity, title: &str, message: &str, source: &str) -> Alert {
        if self.alerts.len() == self.capacity {
            match self.alerts.iter().position(|a| a.resolved) {
                Some(pos) => {
                    self.alerts.remove(pos);
                }
                None => {
                    self.alerts.pop_front();
                }
            }
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            title: title.to_string(),
            message: message.to_string(),
            source: source.to_string(),
            timestamp: Utc::now(),
            acknowledged: false,
            resolved: false,
            resolved_at: None,
        };
        self.alerts.push_back(alert.clone());
        alert
    }

    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn resolve(&mut self, id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                alert.resolved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Unresolved alerts, oldest first
    pub fn active(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn counts(&self) -> AlertCounts {
        let mut counts = AlertCounts::default();
        for alert in self.alerts.iter().filter(|a| !a.resolved) {
            match alert.severity {
                AlertSeverity::Info => counts.info += 1,
                AlertSeverity::Warning => counts.warning += 1,
                AlertSeverity::Critical => counts.critical += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_and_counts() {
        let mut store = AlertStore::new(10);
        let warning = store.create(AlertSeverity::Warning, "Service down", "bridge unreachable", "registry");
        store.create(AlertSeverity::Critical, "Fatal", "controller crashed", "controller");

        assert_eq!(store.counts(), AlertCounts { info: 0, warning: 1, critical: 1 });
        assert!(store.acknowledge(&warning.id));
        assert!(store.resolve(&warning.id));
        assert!(!store.resolve(&warning.id));
        assert_eq!(store.counts().warning, 0);
        assert_eq!(store.active().len(), 1);
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn test_capacity_prefers_dropping_resolved() {
        let mut store = AlertStore::new(2);
        let old = store.create(AlertSeverity::Info, "a", "", "t");
        let resolved = store.create(AlertSeverity::Info, "b", "", "t");
        store.resolve(&resolved.id);
        store.create(AlertSeverity::Info, "c", "", "t");

        let titles: Vec<_> = store.all().into_iter().map(|a| a.title).collect();
        assert_eq!(titles, vec!["a", "c"]);
        assert!(store.acknowledge(&old.id));
    }
}
