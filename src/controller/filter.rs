use regex::Regex;
use serde_json::Value;

use crate::error::{Result, TaskwardenError};
use crate::task::TaskType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Allow,
    Reject { reason: String },
}

/// Decides whether a submission may enter the queue
///
/// An `Err` means the filter itself is broken and is surfaced to the submitter.
pub trait ContentFilter: Send + Sync {
    fn evaluate(&self, task_type: TaskType, input: &Value) -> Result<FilterVerdict>;
}

/// Rejects inputs where any string value matches one of the patterns.
/// With no patterns every input passes.
#[derive(Debug, Clone, Default)]
pub struct BlocklistFilter {
    patterns: Vec<Regex>,
}

impl BlocklistFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| TaskwardenError::Filter(format!("invalid pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn first_match(&self, value: &Value) -> Option<&Regex> {
        match value {
            Value::String(s) => self.patterns.iter().find(|p| p.is_match(s)),
            Value::Array(items) => items.iter().find_map(|v| self.first_match(v)),
            Value::Object(map) => map
                .iter()
                .find_map(|(k, v)| self.patterns.iter().find(|p| p.is_match(k)).or_else(|| self.first_match(v))),
            _ => None,
        }
    }
}

impl ContentFilter for BlocklistFilter {
    fn evaluate(&self, _task_type: TaskType, input: &Value) -> Result<FilterVerdict> {
        Ok(match self.first_match(input) {
            Some(pattern) => FilterVerdict::Reject {
                reason: format!("matched blocklist pattern {:?}", pattern.as_str()),
            },
            None => FilterVerdict::Allow,
        })
    }
}
