/// Autoflow: autonomous workflow automation engine
///
/// This library schedules and runs declarative node-graph workflows. A trigger
/// scheduler decides *when* a workflow runs (cron schedules, system idle time)
/// and a petgraph-based executor decides *how* its nodes run, passing outputs
/// between steps.

// Core configuration and setup
pub mod config;

// Typed error taxonomy
pub mod error;

// Trigger layer - clock, cron evaluation, registry, idle tracking
pub mod trigger;

// Workflow management layer - graph definitions and file storage
pub mod workflow;

// Runtime execution engine - petgraph DAG execution, node dispatch, scheduler
pub mod runtime;

// Host wiring and initialization
pub mod app;

// Re-export commonly used types for external consumers
pub use app::{create_app, start, App};
pub use error::{CronError, PersistenceError, WorkflowError};
pub use runtime::{ExecutionEngine, NodeExecutor, NodeRunner, TriggerHandler, TriggerScheduler};
pub use trigger::{RegisteredTrigger, TriggerConfig, TriggerRegistry};
pub use workflow::{Workflow, WorkflowEdge, WorkflowNode, WorkflowRunRequest, WorkflowRunResult};
