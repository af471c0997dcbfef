#![doc = include_str!("../README.md")]
#![warn(clippy::all)]

//! Taskwarden - in-process task orchestration for multi-capability AI platforms
//!
//! Tasks (voice, text, code, research, autonomous, custom) are queued by
//! priority, routed to the best-scoring capability, executed with bounded
//! concurrency and retried on failure. Every routing, healing and mode choice
//! is kept in an audit log. A companion service registry discovers and
//! health-checks the backing services, and an observability hub collects
//! metrics, logs, spans and alerts from both.
//!
//! ## Usage
//! ```rust,no_run
//! use serde_json::json;
//! use taskwarden::{Config, Platform, SubmitOptions, TaskPriority, TaskType};
//!
//! #[tokio::main]
//! async fn main() -> taskwarden::Result<()> {
//!     let platform = Platform::builder(Config::default()).build()?;
//!     platform.start().await?;
//!
//!     let task = platform
//!         .controller()
//!         .submit_task(
//!             TaskType::Research,
//!             json!({ "query": "vector databases" }),
//!             SubmitOptions::with_priority(TaskPriority::High),
//!         )
//!         .await?;
//!     println!("queued {}", task.id);
//!     Ok(())
//! }
//! ```

/// Configuration loading, defaults and environment overrides
pub mod config;
/// Error handling types and utilities
pub mod error;
/// Outbound event fan-out
pub mod events;
/// Logging configuration and utilities
pub mod logging;
/// Task records and lifecycle states
pub mod task;
/// Stable priority queue of task ids
pub mod task_queue;
/// Execution backends and their live statistics
pub mod capability;
/// Capability selection
pub mod router;
/// Audit log of autonomous decisions
pub mod decision;
pub mod controller;
pub mod registry;
pub mod observability;
/// Notification collaborator contract
pub mod notification;
/// Parallel processing utilities
pub mod parallel;
/// Retry helpers
pub mod utils;
pub mod platform;

// Re-export common types
pub use capability::{Capability, CapabilityType};
pub use config::{Config, OperationMode};
pub use controller::{CapabilityExecutor, ControllerEvent, DispatchOutcome, TaskController};
pub use decision::{Decision, DecisionType};
pub use error::{Result, TaskwardenError};
pub use notification::Notifier;
pub use observability::ObservabilityHub;
pub use platform::Platform;
pub use registry::{EndpointStatus, ServiceEndpoint, ServiceRegistry, ServiceType};
pub use task::{SubmitOptions, Task, TaskPriority, TaskStatus, TaskType};
