//! End-to-end workflow runs with real shell commands
#![cfg(unix)]

use autoflow::{
    runtime::{ExecutionEngine, NodeExecutor},
    workflow::{NodeStatus, RunStatus, Workflow, WorkflowRunRequest},
    WorkflowError,
};
use serde_json::json;
use std::sync::Arc;

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(NodeExecutor::new()))
}

fn workflow(value: serde_json::Value) -> Workflow {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn failing_shell_step_halts_the_run() {
    let workflow = workflow(json!({
        "nodes": [
            {"id": "trigger", "data": {"nodeType": "trigger"}},
            {"id": "shellA", "data": {"nodeType": "shell", "commands": ["echo partial", "exit 7"]}},
            {"id": "shellB", "data": {"nodeType": "shell", "commands": ["echo never"]}}
        ],
        "edges": [
            {"id": "e1", "source": "trigger", "target": "shellA"},
            {"id": "e2", "source": "shellA", "target": "shellB"}
        ]
    }));

    let result = engine()
        .execute(WorkflowRunRequest::from_workflow(&workflow))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.execution_order, vec!["trigger", "shellA"]);
    assert!(result.results.iter().all(|r| r.node_id != "shellB"));

    let failure = result.failure().unwrap();
    assert_eq!(failure.node_id, "shellA");
    assert_eq!(failure.status, NodeStatus::Failed);
    assert_eq!(failure.exit_code, Some(7));
    assert!(failure.output.as_deref().unwrap().contains("partial"));
}

#[tokio::test]
async fn outputs_flow_into_downstream_commands() {
    let workflow = workflow(json!({
        "nodes": [
            {"id": "t", "data": {"nodeType": "trigger"}},
            {"id": "version", "data": {"label": "Get Version", "nodeType": "shell", "commands": ["echo 1.2.3"]}},
            {"id": "report", "data": {"nodeType": "shell", "commands": [
                "echo v={{ version.output }}",
                "echo label={{get_version.output}}",
                "echo 'missing={{ nowhere.output }}'"
            ]}}
        ],
        "edges": [
            {"source": "t", "target": "version"},
            {"source": "version", "target": "report"}
        ]
    }));

    let result = engine()
        .execute(WorkflowRunRequest::from_workflow(&workflow))
        .await
        .unwrap();

    assert!(result.success);
    let report = result.results.iter().find(|r| r.node_id == "report").unwrap();
    let output = report.output.as_deref().unwrap();
    assert!(output.contains("\nv=1.2.3\n"));
    assert!(output.contains("\nlabel=1.2.3\n"));
    assert!(output.contains("\nmissing={{ nowhere.output }}\n"));
}

#[tokio::test]
async fn workdir_applies_to_following_shell_steps() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("project")).unwrap();
    std::fs::write(root.path().join("project").join("README"), "hi").unwrap();

    let workflow = workflow(json!({
        "nodes": [
            {"id": "t", "data": {"nodeType": "trigger"}},
            {"id": "w", "data": {"nodeType": "workdir", "path": "project"}},
            {"id": "list", "data": {"nodeType": "shell", "commands": "ls"}},
            {"id": "show", "data": {"nodeType": "shell", "commands": ["cat {{ list.output }}"]}}
        ],
        "edges": [
            {"source": "t", "target": "w"},
            {"source": "w", "target": "list"},
            {"source": "list", "target": "show"}
        ]
    }));

    let result = engine()
        .execute(WorkflowRunRequest::from_workflow(&workflow).with_root(root.path()))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.failure());
    let show = result.results.iter().find(|r| r.node_id == "show").unwrap();
    assert_eq!(show.output.as_deref(), Some("$ cat README\nhi\n"));
}

#[tokio::test]
async fn cyclic_graph_is_rejected() {
    let workflow = workflow(json!({
        "nodes": [
            {"id": "t", "data": {"nodeType": "trigger"}},
            {"id": "a", "data": {"nodeType": "shell", "commands": ["touch ran"]}},
            {"id": "b", "data": {"nodeType": "shell", "commands": ["touch ran"]}}
        ],
        "edges": [
            {"source": "t", "target": "a"},
            {"source": "a", "target": "b"},
            {"source": "b", "target": "a"}
        ]
    }));
    let root = tempfile::tempdir().unwrap();

    let err = engine()
        .execute(WorkflowRunRequest::from_workflow(&workflow).with_root(root.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::Cycle { .. }));
    assert!(!root.path().join("ran").exists());
}
