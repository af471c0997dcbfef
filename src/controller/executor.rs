use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::{Capability, CapabilityType};
use crate::error::Result;
use crate::task::Task;

/// Runs a task on a capability. An `Err` is an execution failure and counts
/// against the capability's success rate.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value>;
}

fn acknowledgement(kind: &str, task: &Task, capability: &Capability, detail: Value) -> Value {
    json!({
        "kind": kind,
        "status": "accepted",
        "task_id": task.id,
        "task_type": task.task_type,
        "capability": capability.id,
        "detail": detail,
        "handled_at": Utc::now(),
    })
}

fn first_string<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| input.get(*key).and_then(Value::as_str))
}

pub struct VoiceExecutor;

#[async_trait]
impl CapabilityExecutor for VoiceExecutor {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value> {
        let utterance = first_string(&task.input, &["text", "message", "prompt"]).unwrap_or_default();
        Ok(acknowledgement(
            "voice",
            task,
            capability,
            json!({ "utterance": utterance, "voice": task.input.get("voice") }),
        ))
    }
}

pub struct AgentExecutor;

#[async_trait]
impl CapabilityExecutor for AgentExecutor {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value> {
        let goal = first_string(&task.input, &["goal", "prompt", "task", "code"]).unwrap_or_default();
        Ok(acknowledgement("autonomous-agent", task, capability, json!({ "goal": goal })))
    }
}

pub struct ResearchExecutor;

#[async_trait]
impl CapabilityExecutor for ResearchExecutor {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value> {
        let query = first_string(&task.input, &["query", "topic", "prompt"]).unwrap_or_default();
        let depth = task.input.get("depth").and_then(Value::as_u64).unwrap_or(1);
        Ok(acknowledgement("research", task, capability, json!({ "query": query, "depth": depth })))
    }
}

pub struct ToolBridgeExecutor;

#[async_trait]
impl CapabilityExecutor for ToolBridgeExecutor {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value> {
        let tool = first_string(&task.input, &["tool"]).unwrap_or("default");
        Ok(acknowledgement(
            "tool-bridge",
            task,
            capability,
            json!({ "tool": tool, "arguments": task.input.get("arguments").cloned().unwrap_or(Value::Null) }),
        ))
    }
}

/// Used when nothing more specific is registered
pub struct GenericExecutor;

#[async_trait]
impl CapabilityExecutor for GenericExecutor {
    async fn execute(&self, task: &Task, capability: &Capability) -> Result<Value> {
        Ok(acknowledgement("generic", task, capability, task.input.clone()))
    }
}

/// Executor lookup: per capability id, then per family, then the generic fallback
#[derive(Clone)]
pub struct ExecutorTable {
    by_capability: HashMap<String, Arc<dyn CapabilityExecutor>>,
    by_family: HashMap<CapabilityType, Arc<dyn CapabilityExecutor>>,
    fallback: Arc<dyn CapabilityExecutor>,
}

impl ExecutorTable {
    /// Table holding the built-in family executors
    pub fn with_builtins() -> Self {
        let mut by_family: HashMap<CapabilityType, Arc<dyn CapabilityExecutor>> = HashMap::new();
        by_family.insert(CapabilityType::VoiceProvider, Arc::new(VoiceExecutor));
        by_family.insert(CapabilityType::AutonomousAgent, Arc::new(AgentExecutor));
        by_family.insert(CapabilityType::ResearchAgent, Arc::new(ResearchExecutor));
        by_family.insert(CapabilityType::ToolBridge, Arc::new(ToolBridgeExecutor));

        Self {
            by_capability: HashMap::new(),
            by_family,
            fallback: Arc::new(GenericExecutor),
        }
    }

    pub fn set_for_capability(&mut self, capability_id: &str, executor: Arc<dyn CapabilityExecutor>) {
        self.by_capability.insert(capability_id.to_string(), executor);
    }

    pub fn set_for_family(&mut self, family: CapabilityType, executor: Arc<dyn CapabilityExecutor>) {
        self.by_family.insert(family, executor);
    }

    pub fn resolve(&self, capability: &Capability) -> Arc<dyn CapabilityExecutor> {
        self.by_capability
            .get(&capability.id)
            .or_else(|| self.by_family.get(&capability.capability_type))
            .unwrap_or(&self.fallback)
            .clone()
    }
}

impl Default for ExecutorTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}
