use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Outcome recorded when a span ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

/// A timestamped annotation on a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

/// A timed operation. Children share the trace id of their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: SpanStatus,
    pub attributes: Map<String, Value>,
    pub events: Vec<SpanEvent>,
}

/// Where a new span attaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanParent {
    /// Child of the most recently started span that has not ended
    Current,
    /// Start of a new trace
    Root,
}

/// Active span stack plus a ring of finished spans
#[derive(Debug)]
pub struct SpanStore {
    active: Vec<Span>,
    completed: VecDeque<Span>,
    capacity: usize,
}

impl SpanStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: Vec::new(),
            completed: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Starts a span and returns a copy of it
    pub fn start(&mut self, name: &str, attributes: Map<String, Value>, parent: SpanParent) -> Span {
        let parent_span = match parent {
            SpanParent::Current => self.active.last(),
            SpanParent::Root => None,
        };

        let span = Span {
            trace_id: parent_span
                .map(|p| p.trace_id.clone())
                .unwrap_or_else(new_trace_id),
            span_id: new_span_id(),
            parent_span_id: parent_span.map(|p| p.span_id.clone()),
            name: name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: SpanStatus::Unset,
            attributes,
            events: Vec::new(),
        };
        self.active.push(span.clone());
        span
    }

    /// Ends an active span. Returns the finished span, or None if it was not active.
    pub fn end(&mut self, span_id: &str, status: SpanStatus) -> Option<Span> {
        let pos = self.active.iter().position(|s| s.span_id == span_id)?;
        let mut span = self.active.remove(pos);
        let end = Utc::now();
        span.duration_ms = Some((end - span.start_time).num_milliseconds());
        span.end_time = Some(end);
        span.status = status;

        if self.completed.len() == self.capacity {
            self.completed.pop_front();
        }
        self.completed.push_back(span.clone());
        Some(span)
    }

    /// Attaches an event to an active span
    pub fn add_event(&mut self, span_id: &str, name: &str, attributes: Map<String, Value>) -> bool {
        match self.active.iter_mut().find(|s| s.span_id == span_id) {
            Some(span) => {
                span.events.push(SpanEvent {
                    name: name.to_string(),
                    timestamp: Utc::now(),
                    attributes,
                });
                true
            }
            None => false,
        }
    }

    /// The most recently started span that has not ended
    pub fn current(&self) -> Option<&Span> {
        self.active.last()
    }

    /// Every known span of a trace, active ones included, in start order
    pub fn trace(&self, trace_id: &str) -> Vec<Span> {
        let mut spans: Vec<Span> = self
            .completed
            .iter()
            .chain(self.active.iter())
            .filter(|s| s.trace_id == trace_id)
            .cloned()
            .collect();
        spans.sort_by_key(|s| s.start_time);
        spans
    }

    /// Trace ids with at least one active span
    pub fn active_trace_ids(&self) -> Vec<String> {
        unique(self.active.iter().map(|s| s.trace_id.clone()))
    }

    /// Trace ids of the most recently finished spans, newest first
    pub fn recent_trace_ids(&self, limit: usize) -> Vec<String> {
        let mut ids = unique(self.completed.iter().rev().map(|s| s.trace_id.clone()));
        ids.truncate(limit);
        ids
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

fn unique<I: Iterator<Item = String>>(ids: I) -> Vec<String> {
    let mut seen = Vec::new();
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_inherit_trace_of_current_span() {
        let mut store = SpanStore::new(10);
        let root = store.start("dispatch", Map::new(), SpanParent::Current);
        let child = store.start("route", Map::new(), SpanParent::Current);

        assert!(root.parent_span_id.is_none());
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_eq!(store.current().map(|s| s.span_id.clone()), Some(child.span_id.clone()));

        let ended = store.end(&child.span_id, SpanStatus::Ok).unwrap();
        assert!(ended.duration_ms.is_some());
        assert_eq!(store.current().map(|s| s.span_id.clone()), Some(root.span_id.clone()));
        assert!(store.end(&child.span_id, SpanStatus::Ok).is_none());
    }

    #[test]
    fn test_root_spans_start_new_traces() {
        let mut store = SpanStore::new(10);
        let first = store.start("a", Map::new(), SpanParent::Current);
        let second = store.start("b", Map::new(), SpanParent::Root);
        assert_ne!(first.trace_id, second.trace_id);
        assert!(second.parent_span_id.is_none());
        assert_eq!(store.active_trace_ids().len(), 2);
    }

    #[test]
    fn test_events_and_trace_lookup() {
        let mut store = SpanStore::new(10);
        let span = store.start("execute", Map::new(), SpanParent::Root);
        assert!(store.add_event(&span.span_id, "retry", Map::new()));
        store.end(&span.span_id, SpanStatus::Error);
        assert!(!store.add_event(&span.span_id, "late", Map::new()));

        let trace = store.trace(&span.trace_id);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].events.len(), 1);
        assert_eq!(trace[0].status, SpanStatus::Error);
        assert_eq!(store.recent_trace_ids(5), vec![span.trace_id]);
    }
}
