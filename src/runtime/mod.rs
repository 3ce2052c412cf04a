/// Runtime Execution Engine
///
/// This module decides *how* and *when* workflows run. It handles:
/// - Converting workflow graphs to petgraph DAGs and running them in dependency order
/// - Template substitution of upstream outputs into node parameters
/// - Dispatching individual nodes (shell subprocesses, pluggable runners)
/// - The periodic trigger scheduler

// Core execution engine using petgraph for DAG processing
pub mod engine;

// Individual node execution handlers
pub mod executor;

// `{{ id.output }}` substitution and output cleaning
pub mod template;

// Background scheduler for cron and idle triggers
pub mod scheduler;

// Re-export main types
pub use engine::ExecutionEngine;
pub use executor::{NodeExecution, NodeExecutor, NodeRunner};
pub use scheduler::{TriggerHandler, TriggerScheduler};
