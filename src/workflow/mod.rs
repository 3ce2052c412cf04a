/// Workflow Management Layer
///
/// This module handles workflow definitions and their on-disk storage:
/// - Type definitions (Workflow, WorkflowNode, NodeKind, WorkflowEdge)
/// - Per-run execution context and node/run results
/// - JSON file storage under a workspace root

// Core workflow type definitions
pub mod types;

// File-backed workflow storage
pub mod storage;

// Re-export commonly used types
pub use storage::WorkflowStorage;
pub use types::{
    AgentConfig, ExecutionContext, NodeKind, NodeResult, NodeStatus, RunStatus, ScriptConfig,
    ShellConfig, TriggerNodeConfig, WorkdirConfig, Workflow, WorkflowEdge, WorkflowNode,
    WorkflowRunRequest, WorkflowRunResult,
};
