/// Error types for the trigger and execution layers
///
/// Failures local to a single trigger or node are reported through these types
/// (or through boolean/`Option` returns) and never escalate past the component
/// that produced them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the cron evaluator
#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },
    #[error("cron expression '{expression}' has no upcoming occurrence")]
    NoUpcoming { expression: String },
}

/// Errors from reading or writing the trigger snapshot
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("trigger state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize trigger state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to parse trigger state at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Structural errors that prevent a workflow run from starting
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("start node not found: {id}")]
    StartNodeNotFound { id: String },
    #[error("workflow graph contains a cycle through node '{node_id}'")]
    Cycle { node_id: String },
    #[error("failed to load workflow {path}: {message}")]
    Load { path: PathBuf, message: String },
}
