//! Autonomous task controller
//!
//! Owns the priority queue, the bounded dispatch loop, task lifecycle
//! transitions, retries, queue-timeout eviction and the decision log.
//!
//! All controller state sits behind one async mutex. Executions run as
//! detached tokio tasks; only their completion re-enters the lock, so a
//! completion is atomic with respect to dispatch, health ticks and the
//! public API.

pub mod events;
pub mod executor;
pub mod filter;

pub use events::ControllerEvent;
pub use executor::{
    AgentExecutor, CapabilityExecutor, ExecutorTable, GenericExecutor, ResearchExecutor,
    ToolBridgeExecutor, VoiceExecutor,
};
pub use filter::{BlocklistFilter, ContentFilter, FilterVerdict};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capability::{default_capabilities, Capability, CapabilityType};
use crate::config::{ControllerConfig, OperationMode};
use crate::decision::{Decision, DecisionLog, DecisionType};
use crate::error::{Result, TaskwardenError};
use crate::events::EventBus;
use crate::observability::LogLevel;
use crate::router::CapabilityRouter;
use crate::task::{SubmitOptions, Task, TaskStatus, TaskType};
use crate::task_queue::TaskQueue;

pub const FILTERED_ERROR: &str = "Content filtered by guardrails";
pub const NO_CAPABLE_AGENT_ERROR: &str = "No capable agent available";
pub const QUEUE_TIMEOUT_ERROR: &str = "Task timeout in queue";

/// What a single dispatch attempt did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The active set is full
    AtCapacity,
    /// Nothing queued
    Idle,
    Started { task_id: String, capability_id: String },
    /// No capability was available and the task went back in the queue
    Requeued { task_id: String },
    /// No capability was available and the retry budget is spent
    Failed { task_id: String },
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub mode: OperationMode,
    pub content_filtering: bool,
    pub safety_guardrails: bool,
    pub queued: usize,
    pub queue_by_priority: BTreeMap<String, usize>,
    pub active: usize,
    pub max_concurrent_tasks: usize,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub decisions: usize,
    pub decisions_by_type: BTreeMap<String, usize>,
    pub capabilities: Vec<Capability>,
    pub timestamp: DateTime<Utc>,
}

/// Partial update of the controller config. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub max_concurrent_tasks: Option<usize>,
    pub max_retries: Option<u32>,
    pub task_timeout_ms: Option<u64>,
    pub reenable_cooldown_ms: Option<u64>,
    pub disable_threshold: Option<f64>,
    pub reenable_success_rate: Option<f64>,
    pub content_filtering: Option<bool>,
    pub safety_guardrails: Option<bool>,
    pub self_healing: Option<bool>,
    /// Replaces the content filter with a blocklist of these patterns
    pub blocklist: Option<Vec<String>>,
}

struct ActiveTask {
    capability_id: String,
    started: Instant,
}

struct ControllerState {
    config: ControllerConfig,
    tasks: HashMap<String, Task>,
    queue: TaskQueue,
    active: HashMap<String, ActiveTask>,
    /// Registration order, which is also the router's tie-break order
    capabilities: Vec<Capability>,
    auto_disabled: HashSet<String>,
    executors: ExecutorTable,
    filter: Arc<dyn ContentFilter>,
    decisions: DecisionLog,
    running: bool,
}

impl ControllerState {
    fn record_decision(
        &mut self,
        decision_type: DecisionType,
        reason: impl Into<String>,
        input: Value,
        output: Value,
    ) -> Decision {
        let requires_approval = self.config.mode.requires_approval();
        self.decisions.record(decision_type, reason, input, output, requires_approval)
    }

    fn snapshot(&self) -> ControllerStatus {
        let count = |status: TaskStatus| self.tasks.values().filter(|t| t.status == status).count();
        ControllerStatus {
            running: self.running,
            mode: self.config.mode,
            content_filtering: self.config.content_filtering,
            safety_guardrails: self.config.safety_guardrails,
            queued: self.queue.len(),
            queue_by_priority: self
                .queue
                .depth_by_priority()
                .iter()
                .map(|(priority, depth)| (priority.as_str().to_string(), *depth))
                .collect(),
            active: self.active.len(),
            max_concurrent_tasks: self.config.max_concurrent_tasks,
            total_tasks: self.tasks.len(),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            cancelled: count(TaskStatus::Cancelled),
            decisions: self.decisions.len(),
            decisions_by_type: DecisionType::ALL
                .iter()
                .map(|kind| (kind.as_str().to_string(), self.decisions.count_of(*kind)))
                .collect(),
            capabilities: self.capabilities.clone(),
            timestamp: Utc::now(),
        }
    }

    fn capability_mut(&mut self, id: &str) -> Option<&mut Capability> {
        self.capabilities.iter_mut().find(|c| c.id == id)
    }
}

struct ControllerInner {
    state: Mutex<ControllerState>,
    events: EventBus<ControllerEvent>,
    router: CapabilityRouter,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the task controller. Clones share state.
#[derive(Clone)]
pub struct TaskController {
    inner: Arc<ControllerInner>,
}

impl TaskController {
    /// Builds a controller. Fails if the configured blocklist does not compile.
    pub fn new(mut config: ControllerConfig) -> Result<Self> {
        let mode = config.mode;
        apply_mode_flags(&mut config, mode);
        let filter: Arc<dyn ContentFilter> = Arc::new(BlocklistFilter::new(&config.blocklist)?);
        let capabilities = if config.register_default_capabilities {
            default_capabilities()
        } else {
            Vec::new()
        };

        Ok(Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ControllerState {
                    config,
                    tasks: HashMap::new(),
                    queue: TaskQueue::new(),
                    active: HashMap::new(),
                    capabilities,
                    auto_disabled: HashSet::new(),
                    executors: ExecutorTable::with_builtins(),
                    filter,
                    decisions: DecisionLog::new(),
                    running: false,
                }),
                events: EventBus::new(),
                router: CapabilityRouter::new(),
                loops: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn subscribe(&self) -> UnboundedReceiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: ControllerEvent) {
        self.inner.events.emit(event);
    }

    /// Starts the dispatch and health loops
    pub async fn start(&self) {
        let mut loops = self.inner.loops.lock().await;
        if !loops.is_empty() {
            warn!("task controller already running");
            return;
        }

        let (dispatch_interval, health_interval) = {
            let mut state = self.inner.state.lock().await;
            state.running = true;
            (state.config.dispatch_interval(), state.config.health_interval())
        };

        loops.push(spawn_dispatch_loop(Arc::downgrade(&self.inner), dispatch_interval));
        loops.push(spawn_health_loop(Arc::downgrade(&self.inner), health_interval));

        info!(?dispatch_interval, ?health_interval, "task controller started");
        self.emit(ControllerEvent::Started);
    }

    /// Stops both loops. In-flight executions still complete and are recorded.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self.inner.loops.lock().await.drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            handle.abort();
        }
        self.inner.state.lock().await.running = false;
        info!("task controller stopped");
        self.emit(ControllerEvent::Stopped);
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// Creates a task and queues it, unless the content filter rejects it
    ///
    /// A rejected task is recorded as cancelled and returned without error.
    /// Only a failing filter produces an `Err`.
    pub async fn submit_task(&self, task_type: TaskType, input: Value, options: SubmitOptions) -> Result<Task> {
        let mut state = self.inner.state.lock().await;
        let max_retries = options.max_retries.unwrap_or(state.config.max_retries);
        let mut task = Task::new(task_type, input, options.priority, max_retries);
        task.required_tags = options.required_tags;

        if state.config.content_filtering && state.config.mode != OperationMode::Unrestricted {
            if let FilterVerdict::Reject { reason } = state.filter.evaluate(task.task_type, &task.input)? {
                task.mark_cancelled(Some(FILTERED_ERROR));
                info!(task_id = %task.id, %reason, "task filtered");
                state.tasks.insert(task.id.clone(), task.clone());
                self.emit(ControllerEvent::TaskFiltered {
                    task: task.clone(),
                    reason,
                });
                return Ok(task);
            }
        }

        state.queue.push(task.id.clone(), task.priority);
        state.tasks.insert(task.id.clone(), task.clone());
        debug!(task_id = %task.id, task_type = %task.task_type, priority = %task.priority, "task queued");
        self.emit(ControllerEvent::TaskQueued(task.clone()));
        Ok(task)
    }

    /// One dispatch step: pops the head of the queue and starts it on the best capability
    pub async fn dispatch_once(&self) -> DispatchOutcome {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        if state.active.len() >= state.config.max_concurrent_tasks {
            return DispatchOutcome::AtCapacity;
        }

        let task_id = loop {
            match state.queue.pop() {
                None => return DispatchOutcome::Idle,
                Some(id) if matches!(state.tasks.get(&id), Some(t) if t.status == TaskStatus::Queued) => break id,
                Some(id) => debug!(task_id = %id, "dropping stale queue entry"),
            }
        };

        let selection = match state.tasks.get(&task_id) {
            Some(task) => self.inner.router.select(task, state.capabilities.iter()),
            None => return DispatchOutcome::Idle,
        };

        let selection = match selection {
            Some(selection) => selection,
            None => return self.no_capability(state, task_id),
        };

        if selection.is_contested() {
            let task_type = state.tasks.get(&task_id).map(|t| t.task_type);
            let decision = state.record_decision(
                DecisionType::Route,
                format!("Routed task to {}", selection.selected),
                json!({ "task_id": task_id, "task_type": task_type, "candidates": selection.candidates }),
                json!({ "selected": selection.selected, "score": selection.score }),
            );
            self.emit(ControllerEvent::Decision(decision));
        }

        let capability = match state.capability_mut(&selection.selected) {
            Some(capability) => {
                capability.acquire();
                capability.clone()
            }
            None => return DispatchOutcome::Idle,
        };
        let task = match state.tasks.get_mut(&task_id) {
            Some(task) => {
                task.mark_running(&capability.id);
                task.clone()
            }
            None => return DispatchOutcome::Idle,
        };

        state.active.insert(
            task_id.clone(),
            ActiveTask {
                capability_id: capability.id.clone(),
                started: Instant::now(),
            },
        );
        let executor = state.executors.resolve(&capability);

        info!(task_id = %task.id, capability = %capability.id, "task started");
        self.emit(ControllerEvent::TaskStarted {
            task: task.clone(),
            capability_id: capability.id.clone(),
        });

        let controller = self.clone();
        let capability_id = capability.id.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match AssertUnwindSafe(executor.execute(&task, &capability))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => Err(TaskwardenError::execution(panic_message(&*panic))),
            };
            controller.complete(&task.id, started.elapsed(), outcome).await;
        });

        DispatchOutcome::Started { task_id, capability_id }
    }

    fn no_capability(&self, state: &mut ControllerState, task_id: String) -> DispatchOutcome {
        let task = match state.tasks.get_mut(&task_id) {
            Some(task) => task,
            None => return DispatchOutcome::Idle,
        };

        if task.can_retry() {
            task.mark_requeued();
            state.queue.push(task_id.clone(), task.priority);
            debug!(task_id = %task_id, retry = task.retry_count, "no capability available, requeued");
            self.emit(ControllerEvent::TaskQueued(task.clone()));
            DispatchOutcome::Requeued { task_id }
        } else {
            task.mark_failed(NO_CAPABLE_AGENT_ERROR);
            warn!(task_id = %task_id, task_type = %task.task_type, "no capable agent available");
            self.emit(ControllerEvent::TaskFailed(task.clone()));
            DispatchOutcome::Failed { task_id }
        }
    }

    /// Records the end of an execution. Always releases the capability slot.
    async fn complete(&self, task_id: &str, elapsed: Duration, outcome: Result<Value>) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let active = match state.active.remove(task_id) {
            Some(active) => active,
            None => {
                warn!(task_id, "completion for a task that is not active");
                return;
            }
        };
        let self_healing = state.config.self_healing;
        let requires_approval = state.config.mode.requires_approval();

        let capability = state.capabilities.iter_mut().find(|c| c.id == active.capability_id);
        let capability = match capability {
            Some(capability) => {
                capability.release();
                Some(capability)
            }
            None => None,
        };

        let task = match state.tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Running => task,
            _ => {
                debug!(task_id, "task no longer running, discarding result");
                return;
            }
        };

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match outcome {
            Ok(result) => {
                if let Some(capability) = capability {
                    capability.record_success(elapsed_ms);
                }
                task.mark_completed(result);
                info!(task_id, capability = %active.capability_id, elapsed_ms, "task completed");
                self.emit(ControllerEvent::TaskCompleted {
                    task: task.clone(),
                    duration_ms: active.started.elapsed().as_millis() as u64,
                });
            }
            Err(error) => {
                if let Some(capability) = capability {
                    capability.record_failure();
                }

                if task.can_retry() {
                    task.mark_requeued();
                    state.queue.push(task.id.clone(), task.priority);
                    warn!(task_id, retry = task.retry_count, error = %error, "task failed, retrying");
                    self.emit(ControllerEvent::TaskQueued(task.clone()));

                    if self_healing {
                        let decision = state.decisions.record(
                            DecisionType::Heal,
                            "Retrying failed task",
                            json!({ "task_id": task.id, "capability": active.capability_id, "error": error.to_string() }),
                            json!({ "retry_count": task.retry_count, "max_retries": task.max_retries }),
                            requires_approval,
                        );
                        self.emit(ControllerEvent::Decision(decision));
                    }
                } else {
                    task.mark_failed(error.to_string());
                    warn!(task_id, error = %error, "task failed");
                    self.emit(ControllerEvent::TaskFailed(task.clone()));
                }
            }
        }
    }

    /// Health tick: disables underperformers, evicts timed-out queued tasks
    /// and publishes a status snapshot
    pub async fn run_health_check(&self) -> ControllerStatus {
        let (status, disabled, cooldown) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;

            let mut disabled = Vec::new();
            if state.config.self_healing {
                let threshold = state.config.disable_threshold;
                let underperforming: Vec<(String, f64)> = state
                    .capabilities
                    .iter()
                    .filter(|c| c.enabled && c.success_rate < threshold)
                    .map(|c| (c.id.clone(), c.success_rate))
                    .collect();

                for (id, success_rate) in underperforming {
                    if let Some(capability) = state.capability_mut(&id) {
                        capability.enabled = false;
                    }
                    state.auto_disabled.insert(id.clone());
                    warn!(capability = %id, success_rate, "disabling underperforming capability");
                    let decision = state.record_decision(
                        DecisionType::Heal,
                        "Disabled underperforming capability",
                        json!({ "capability": id, "success_rate": success_rate, "threshold": threshold }),
                        json!({ "enabled": false, "reenable_after_ms": state.config.reenable_cooldown_ms }),
                    );
                    self.emit(ControllerEvent::Decision(decision));
                    disabled.push(id);
                }
            }

            let now = Utc::now();
            let timeout_ms = state.config.task_timeout_ms as i64;
            let tasks = &state.tasks;
            let expired = state
                .queue
                .drain_where(|id| tasks.get(id).map_or(false, |t| t.age_ms(now) > timeout_ms));
            for id in expired {
                if let Some(task) = state.tasks.get_mut(&id) {
                    task.mark_failed(QUEUE_TIMEOUT_ERROR);
                    warn!(task_id = %id, "task timed out in queue");
                    self.emit(ControllerEvent::TaskTimeout(task.clone()));
                }
            }

            (state.snapshot(), disabled, state.config.reenable_cooldown())
        };

        for id in disabled {
            self.schedule_reenable(id, cooldown);
        }

        self.emit(ControllerEvent::HealthCheck(status.clone()));
        status
    }

    fn schedule_reenable(&self, capability_id: String, cooldown: Duration) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => return,
            };

            let mut state = inner.state.lock().await;
            if !state.auto_disabled.remove(&capability_id) {
                return;
            }
            let baseline = state.config.reenable_success_rate;
            if let Some(capability) = state.capability_mut(&capability_id) {
                capability.enabled = true;
                capability.success_rate = baseline;
                info!(capability = %capability_id, success_rate = baseline, "capability re-enabled");
                inner.events.emit(ControllerEvent::Log {
                    level: LogLevel::Info,
                    message: format!("Re-enabled capability {} at success rate {}", capability_id, baseline),
                });
            }
        });
    }

    /// Switches the operation mode and returns the logged decision
    ///
    /// Supervised forces filtering and guardrails on, unrestricted forces them
    /// off, autonomous leaves them as they are.
    pub async fn set_mode(&self, mode: OperationMode) -> Decision {
        let mut state = self.inner.state.lock().await;
        let previous = state.config.mode;
        apply_mode_flags(&mut state.config, mode);

        let output = json!({
            "mode": mode,
            "content_filtering": state.config.content_filtering,
            "safety_guardrails": state.config.safety_guardrails,
        });
        let decision = state.record_decision(
            DecisionType::Route,
            format!("Operation mode changed from {} to {}", previous, mode),
            json!({ "previous": previous }),
            output,
        );

        info!(%previous, %mode, "operation mode changed");
        self.emit(ControllerEvent::Decision(decision.clone()));
        self.emit(ControllerEvent::ModeChanged { previous, mode });
        decision
    }

    pub async fn mode(&self) -> OperationMode {
        self.inner.state.lock().await.config.mode
    }

    /// Cancels a task that has not finished. A running executor is not interrupted.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let task = match state.tasks.get_mut(task_id) {
            Some(task) if !task.status.is_terminal() => task,
            _ => return false,
        };

        task.mark_cancelled(None);
        state.queue.remove(task_id);
        info!(task_id, "task cancelled");
        self.emit(ControllerEvent::TaskCancelled(task.clone()));
        true
    }

    /// Adds a capability, or replaces the one with the same id while keeping its live load
    pub async fn register_capability(
        &self,
        mut capability: Capability,
        executor: Option<Arc<dyn CapabilityExecutor>>,
    ) -> Capability {
        let mut state = self.inner.state.lock().await;
        if let Some(executor) = executor {
            state.executors.set_for_capability(&capability.id, executor);
        }

        match state.capability_mut(&capability.id) {
            Some(existing) => {
                capability.current_load = existing.current_load;
                *existing = capability.clone();
            }
            None => state.capabilities.push(capability.clone()),
        }

        info!(capability = %capability.id, family = %capability.capability_type, "capability registered");
        self.emit(ControllerEvent::CapabilityRegistered(capability.clone()));
        capability
    }

    /// Sets the executor used by every capability of a family without its own executor
    pub async fn register_executor(&self, family: CapabilityType, executor: Arc<dyn CapabilityExecutor>) {
        self.inner.state.lock().await.executors.set_for_family(family, executor);
    }

    pub async fn set_content_filter(&self, filter: Arc<dyn ContentFilter>) {
        self.inner.state.lock().await.filter = filter;
    }

    /// Manually enables or disables a capability. Cancels any pending auto re-enable.
    pub async fn set_capability_enabled(&self, capability_id: &str, enabled: bool) -> Result<Capability> {
        let mut state = self.inner.state.lock().await;
        state.auto_disabled.remove(capability_id);
        let capability = state
            .capability_mut(capability_id)
            .ok_or_else(|| TaskwardenError::NotFound(format!("capability {}", capability_id)))?;
        capability.enabled = enabled;
        Ok(capability.clone())
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> Result<ControllerConfig> {
        let mut state = self.inner.state.lock().await;
        let mut config = state.config.clone();

        if let Some(value) = update.max_concurrent_tasks {
            if value == 0 {
                return Err(TaskwardenError::Validation("max_concurrent_tasks must be at least 1".into()));
            }
            config.max_concurrent_tasks = value;
        }
        for (name, value) in [
            ("disable_threshold", update.disable_threshold),
            ("reenable_success_rate", update.reenable_success_rate),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(TaskwardenError::Validation(format!("{} must be within [0, 1]", name)));
                }
            }
        }
        if let Some(value) = update.max_retries {
            config.max_retries = value;
        }
        if let Some(value) = update.task_timeout_ms {
            config.task_timeout_ms = value;
        }
        if let Some(value) = update.reenable_cooldown_ms {
            config.reenable_cooldown_ms = value;
        }
        if let Some(value) = update.disable_threshold {
            config.disable_threshold = value;
        }
        if let Some(value) = update.reenable_success_rate {
            config.reenable_success_rate = value;
        }
        if let Some(value) = update.content_filtering {
            config.content_filtering = value;
        }
        if let Some(value) = update.safety_guardrails {
            config.safety_guardrails = value;
        }
        if let Some(value) = update.self_healing {
            config.self_healing = value;
        }
        if let Some(patterns) = update.blocklist {
            state.filter = Arc::new(BlocklistFilter::new(&patterns)?);
            config.blocklist = patterns;
        }

        state.config = config.clone();
        info!("controller config updated");
        self.emit(ControllerEvent::ConfigUpdated(config.clone()));
        Ok(config)
    }

    pub async fn config(&self) -> ControllerConfig {
        self.inner.state.lock().await.config.clone()
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.state.lock().await.tasks.get(task_id).cloned()
    }

    /// Tasks in creation order, optionally only those with `status`
    pub async fn tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.inner.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn capabilities(&self) -> Vec<Capability> {
        self.inner.state.lock().await.capabilities.clone()
    }

    pub async fn decisions(&self, limit: usize) -> Vec<Decision> {
        self.inner.state.lock().await.decisions.recent(limit)
    }

    pub async fn status(&self) -> ControllerStatus {
        self.inner.state.lock().await.snapshot()
    }
}

fn apply_mode_flags(config: &mut ControllerConfig, mode: OperationMode) {
    config.mode = mode;
    match mode {
        OperationMode::Supervised => {
            config.content_filtering = true;
            config.safety_guardrails = true;
        }
        OperationMode::Unrestricted => {
            config.content_filtering = false;
            config.safety_guardrails = false;
        }
        OperationMode::Autonomous => {}
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("executor panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("executor panicked: {}", message)
    } else {
        "executor panicked".to_string()
    }
}

/// Each tick starts queued tasks until the controller is full, the queue is
/// empty, or a task had to be requeued
fn spawn_dispatch_loop(inner: Weak<ControllerInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let controller = match inner.upgrade() {
                Some(inner) => TaskController { inner },
                None => break,
            };
            loop {
                match controller.dispatch_once().await {
                    DispatchOutcome::Started { .. } | DispatchOutcome::Failed { .. } => continue,
                    _ => break,
                }
            }
        }
    })
}

fn spawn_health_loop(inner: Weak<ControllerInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let controller = match inner.upgrade() {
                Some(inner) => TaskController { inner },
                None => break,
            };
            controller.run_health_check().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskPriority;
    use pretty_assertions::assert_eq;

    fn bare_config() -> ControllerConfig {
        ControllerConfig {
            register_default_capabilities: false,
            ..ControllerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_mode_flag_asymmetry() {
        let controller = TaskController::new(ControllerConfig {
            mode: OperationMode::Supervised,
            ..bare_config()
        })
        .unwrap();
        assert!(controller.config().await.content_filtering);

        controller.set_mode(OperationMode::Unrestricted).await;
        assert!(!controller.config().await.content_filtering);
        assert!(!controller.config().await.safety_guardrails);

        let decision = controller.set_mode(OperationMode::Autonomous).await;
        assert!(!controller.config().await.content_filtering);
        assert_eq!(decision.decision_type, DecisionType::Route);
        assert!(decision.executed);

        let decision = controller.set_mode(OperationMode::Supervised).await;
        assert!(controller.config().await.content_filtering);
        assert!(decision.requires_approval);
        assert!(!decision.executed);
    }

    #[tokio::test]
    async fn test_no_capability_without_retries_fails_immediately() {
        let controller = TaskController::new(bare_config()).unwrap();
        let task = controller
            .submit_task(TaskType::Voice, json!({}), SubmitOptions::default().max_retries(0))
            .await
            .unwrap();

        let outcome = controller.dispatch_once().await;
        assert_eq!(outcome, DispatchOutcome::Failed { task_id: task.id.clone() });

        let task = controller.get_task(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(NO_CAPABLE_AGENT_ERROR));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_no_capability_requeues_while_budget_remains() {
        let controller = TaskController::new(bare_config()).unwrap();
        let task = controller
            .submit_task(TaskType::Voice, json!({}), SubmitOptions::default().max_retries(1))
            .await
            .unwrap();

        assert!(matches!(controller.dispatch_once().await, DispatchOutcome::Requeued { .. }));
        assert_eq!(controller.get_task(&task.id).await.unwrap().retry_count, 1);
        assert!(matches!(controller.dispatch_once().await, DispatchOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_filter_rejects_in_supervised_mode() {
        let controller = TaskController::new(ControllerConfig {
            mode: OperationMode::Supervised,
            blocklist: vec!["(?i)forbidden".to_string()],
            ..bare_config()
        })
        .unwrap();
        let mut events = controller.subscribe();

        let task = controller
            .submit_task(TaskType::Text, json!({"prompt": "something FORBIDDEN"}), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error.as_deref(), Some(FILTERED_ERROR));
        assert_eq!(events.try_recv().unwrap().name(), "task_filtered");
        assert_eq!(controller.status().await.queued, 0);

        controller.set_mode(OperationMode::Unrestricted).await;
        let task = controller
            .submit_task(TaskType::Text, json!({"prompt": "something FORBIDDEN"}), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_cancel_removes_queued_task() {
        let controller = TaskController::new(ControllerConfig::default()).unwrap();
        let task = controller
            .submit_task(TaskType::Code, json!({}), SubmitOptions::with_priority(TaskPriority::High))
            .await
            .unwrap();

        assert!(controller.cancel_task(&task.id).await);
        assert!(!controller.cancel_task(&task.id).await);
        assert!(!controller.cancel_task("missing").await);
        assert_eq!(controller.dispatch_once().await, DispatchOutcome::Idle);
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let controller = TaskController::new(bare_config()).unwrap();
        let err = controller
            .update_config(ConfigUpdate {
                max_concurrent_tasks: Some(0),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskwardenError::Validation(_)));

        let err = controller
            .update_config(ConfigUpdate {
                blocklist: Some(vec!["(".to_string()]),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskwardenError::Filter(_)));

        let config = controller
            .update_config(ConfigUpdate {
                max_retries: Some(7),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(config.max_retries, 7);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "executor panicked: boom");
    }
}
