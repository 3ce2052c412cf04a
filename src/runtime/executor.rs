/// Node execution handlers
///
/// Dispatches a single (already template-substituted) node by kind:
/// - Shell: commands run in order in a subprocess, stopping at the first failure
/// - Trigger: pass-through entry point
/// - Workdir: provides a working directory to downstream steps
/// - Agent / Script / other: delegated to a registered [`NodeRunner`], or
///   completed with a placeholder when none is registered

use crate::{
    runtime::template::clean_output,
    workflow::types::{ExecutionContext, NodeKind, NodeResult, ShellConfig, WorkflowNode},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};
use tokio::process::Command;

/// External executor for node kinds the engine does not run itself
///
/// Agent and script runners live outside this crate; they receive the node
/// with templates already resolved and return the text output of the step.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(&self, node: &WorkflowNode, working_dir: Option<&Path>) -> anyhow::Result<String>;
}

/// Result of executing one node
#[derive(Debug, Clone)]
pub struct NodeExecution {
    pub result: NodeResult,
    /// Value recorded in the execution context for downstream templates
    pub context_output: Option<String>,
    /// Working directory this node provides to downstream steps
    pub working_dir: Option<PathBuf>,
}

impl NodeExecution {
    fn new(result: NodeResult) -> Self {
        Self {
            result,
            context_output: None,
            working_dir: None,
        }
    }
}

/// Node executor that handles execution of different node types
#[derive(Default)]
pub struct NodeExecutor {
    /// Runners keyed by node type tag ("agent", "script", ...)
    runners: HashMap<String, Arc<dyn NodeRunner>>,
}

impl NodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner for a node type, replacing any previous one
    pub fn with_runner(mut self, node_type: impl Into<String>, runner: Arc<dyn NodeRunner>) -> Self {
        self.runners.insert(node_type.into(), runner);
        self
    }

    /// Execute a single node
    ///
    /// `root` is the workflow root directory used to resolve relative paths.
    pub async fn execute_node(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
        root: Option<&Path>,
    ) -> NodeExecution {
        tracing::info!("🚀 Starting node execution: {} (type: {})", node.id, node.kind.type_name());
        let start_time = std::time::Instant::now();
        let running = NodeResult::running(&node.id);

        let execution = match &node.kind {
            NodeKind::Shell(config) => {
                let cwd = resolve_dir(config.path.as_deref(), context, root);
                self.execute_shell(config, cwd.as_deref(), running).await
            }
            NodeKind::Trigger(_) => NodeExecution::new(running.complete(None)),
            NodeKind::Workdir(config) => {
                let dir = resolve_dir(config.path.as_deref(), context, root)
                    .unwrap_or_else(|| PathBuf::from("."));
                let description = dir.display().to_string();
                NodeExecution {
                    result: running.complete(Some(description.clone())),
                    context_output: Some(description),
                    working_dir: Some(dir),
                }
            }
            NodeKind::Agent(_) | NodeKind::Script(_) | NodeKind::Opaque { .. } => {
                let path = match &node.kind {
                    NodeKind::Agent(config) => config.path.as_deref(),
                    NodeKind::Script(config) => config.path.as_deref(),
                    _ => None,
                };
                let cwd = resolve_dir(path, context, root);
                self.execute_delegated(node, cwd.as_deref(), running).await
            }
        };

        let duration = start_time.elapsed();
        if execution.result.is_failed() {
            tracing::error!(
                "❌ Node execution failed: {} in {:?} - Error: {}",
                node.id,
                duration,
                execution.result.error.as_deref().unwrap_or("unknown error")
            );
        } else {
            tracing::info!("✅ Node execution completed: {} in {:?}", node.id, duration);
        }

        execution
    }

    /// Run each command in sequence, stopping at the first nonzero exit
    async fn execute_shell(
        &self,
        config: &ShellConfig,
        cwd: Option<&Path>,
        running: NodeResult,
    ) -> NodeExecution {
        let mut transcript = String::new();

        for command in &config.commands {
            tracing::debug!("🐚 Running `{}` in {:?}", command, cwd);
            transcript.push_str(&format!("$ {command}\n"));

            let output = match shell_command(command, cwd).output().await {
                Ok(output) => output,
                Err(e) => {
                    return NodeExecution::new(running.fail(
                        format!("Failed to start `{command}`: {e}"),
                        None,
                        Some(transcript),
                    ))
                }
            };

            append_stream(&mut transcript, &String::from_utf8_lossy(&output.stdout));
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                append_stream(&mut transcript, &stderr);
            }

            if !output.status.success() {
                let exit_code = output.status.code();
                let error = match exit_code {
                    Some(code) => format!("Command `{command}` exited with code {code}"),
                    None => format!("Command `{command}` was terminated by a signal"),
                };
                return NodeExecution::new(running.fail(error, exit_code, Some(transcript)));
            }
        }

        let cleaned = clean_output(&transcript, &config.commands);
        NodeExecution {
            result: running.complete(Some(transcript)),
            context_output: Some(cleaned),
            working_dir: None,
        }
    }

    /// Hand the node to a registered runner, or complete with a placeholder
    async fn execute_delegated(
        &self,
        node: &WorkflowNode,
        cwd: Option<&Path>,
        running: NodeResult,
    ) -> NodeExecution {
        let node_type = node.kind.type_name();
        let Some(runner) = self.runners.get(node_type) else {
            tracing::debug!("⏭️ No runner for '{}' nodes, skipping {}", node_type, node.id);
            return NodeExecution::new(
                running.complete(Some(format!("No executor for '{node_type}' nodes; step skipped"))),
            );
        };

        match runner.run(node, cwd).await {
            Ok(output) => {
                let cleaned = output.trim().to_string();
                NodeExecution {
                    result: running.complete(Some(output)),
                    context_output: Some(cleaned),
                    working_dir: None,
                }
            }
            Err(e) => NodeExecution::new(running.fail(format!("{e:#}"), None, None)),
        }
    }
}

/// Node path (absolute, or relative to root) → inherited workdir → root
fn resolve_dir(path: Option<&str>, context: &ExecutionContext, root: Option<&Path>) -> Option<PathBuf> {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => {
            let path = Path::new(path);
            match root {
                Some(root) if path.is_relative() => Some(root.join(path)),
                _ => Some(path.to_path_buf()),
            }
        }
        None => context
            .working_dir
            .clone()
            .or_else(|| root.map(Path::to_path_buf)),
    }
}

fn shell_command(command: &str, cwd: Option<&Path>) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

fn append_stream(transcript: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    transcript.push_str(text);
    if !text.ends_with('\n') {
        transcript.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{AgentConfig, NodeStatus, TriggerNodeConfig, WorkdirConfig};
    use serde_json::json;

    struct EchoRunner;

    #[async_trait]
    impl NodeRunner for EchoRunner {
        async fn run(&self, node: &WorkflowNode, _working_dir: Option<&Path>) -> anyhow::Result<String> {
            match &node.kind {
                NodeKind::Agent(config) => Ok(format!("  agent said: {}\n", config.prompt)),
                _ => anyhow::bail!("unsupported node {}", node.id),
            }
        }
    }

    #[test]
    fn test_resolve_dir_precedence() {
        let mut ctx = ExecutionContext::default();
        let root = Path::new("/srv/root");

        assert_eq!(resolve_dir(None, &ctx, None), None);
        assert_eq!(resolve_dir(None, &ctx, Some(root)), Some(PathBuf::from("/srv/root")));
        assert_eq!(resolve_dir(Some("app"), &ctx, Some(root)), Some(PathBuf::from("/srv/root/app")));
        assert_eq!(resolve_dir(Some("/abs"), &ctx, Some(root)), Some(PathBuf::from("/abs")));

        ctx.working_dir = Some(PathBuf::from("/inherited"));
        assert_eq!(resolve_dir(None, &ctx, Some(root)), Some(PathBuf::from("/inherited")));
        assert_eq!(resolve_dir(Some("  "), &ctx, Some(root)), Some(PathBuf::from("/inherited")));
    }

    #[tokio::test]
    async fn test_trigger_is_pass_through() {
        let node = WorkflowNode::new("t", NodeKind::Trigger(TriggerNodeConfig::default()));
        let execution = NodeExecutor::new()
            .execute_node(&node, &ExecutionContext::default(), None)
            .await;

        assert_eq!(execution.result.status, NodeStatus::Completed);
        assert_eq!(execution.result.output, None);
        assert!(execution.result.end_time.is_some());
    }

    #[tokio::test]
    async fn test_workdir_provides_directory() {
        let node = WorkflowNode::new(
            "w",
            NodeKind::Workdir(WorkdirConfig {
                path: Some("repo".to_string()),
            }),
        );
        let execution = NodeExecutor::new()
            .execute_node(&node, &ExecutionContext::default(), Some(Path::new("/srv")))
            .await;

        assert_eq!(execution.result.status, NodeStatus::Completed);
        assert_eq!(execution.working_dir, Some(PathBuf::from("/srv/repo")));
        assert_eq!(execution.context_output.as_deref(), Some("/srv/repo"));
    }

    #[tokio::test]
    async fn test_unknown_type_completes_with_placeholder() {
        let node = WorkflowNode::new(
            "h",
            NodeKind::Opaque {
                node_type: "webhook".to_string(),
                data: json!({}),
            },
        );
        let execution = NodeExecutor::new()
            .execute_node(&node, &ExecutionContext::default(), None)
            .await;

        assert_eq!(execution.result.status, NodeStatus::Completed);
        assert!(execution.result.output.unwrap().contains("webhook"));
        assert_eq!(execution.context_output, None);
    }

    #[tokio::test]
    async fn test_agent_runner_is_used() {
        let executor = NodeExecutor::new().with_runner("agent", Arc::new(EchoRunner));
        let node = WorkflowNode::new(
            "a",
            NodeKind::Agent(AgentConfig {
                prompt: "hello".to_string(),
                ..AgentConfig::default()
            }),
        );

        let execution = executor.execute_node(&node, &ExecutionContext::default(), None).await;
        assert_eq!(execution.result.status, NodeStatus::Completed);
        assert_eq!(execution.context_output.as_deref(), Some("agent said: hello"));
    }

    #[tokio::test]
    async fn test_runner_error_fails_node() {
        let executor = NodeExecutor::new().with_runner("script", Arc::new(EchoRunner));
        let node = WorkflowNode::new("s", NodeKind::Script(Default::default()));

        let execution = executor.execute_node(&node, &ExecutionContext::default(), None).await;
        assert_eq!(execution.result.status, NodeStatus::Failed);
        assert!(execution.result.error.unwrap().contains("unsupported node s"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_collects_stdout_and_stderr() {
        let node = WorkflowNode::new(
            "sh",
            NodeKind::Shell(ShellConfig {
                commands: vec!["echo out".to_string(), "echo err 1>&2".to_string()],
                path: None,
            }),
        );
        let execution = NodeExecutor::new()
            .execute_node(&node, &ExecutionContext::default(), None)
            .await;

        assert_eq!(execution.result.status, NodeStatus::Completed);
        let transcript = execution.result.output.unwrap();
        assert_eq!(transcript, "$ echo out\nout\n$ echo err 1>&2\nerr\n");
        assert_eq!(execution.context_output.as_deref(), Some("out\nerr"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_stops_at_first_failure() {
        let node = WorkflowNode::new(
            "sh",
            NodeKind::Shell(ShellConfig {
                commands: vec![
                    "echo before".to_string(),
                    "exit 3".to_string(),
                    "echo after".to_string(),
                ],
                path: None,
            }),
        );
        let execution = NodeExecutor::new()
            .execute_node(&node, &ExecutionContext::default(), None)
            .await;

        let result = execution.result;
        assert_eq!(result.status, NodeStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        let output = result.output.unwrap();
        assert!(output.contains("before"));
        assert!(!output.contains("after"));
        assert_eq!(execution.context_output, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runs_in_resolved_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/marker.txt"), "").unwrap();

        let node = WorkflowNode::new(
            "sh",
            NodeKind::Shell(ShellConfig {
                commands: vec!["ls".to_string()],
                path: Some("sub".to_string()),
            }),
        );
        let execution = NodeExecutor::new()
            .execute_node(&node, &ExecutionContext::default(), Some(dir.path()))
            .await;

        assert_eq!(execution.context_output.as_deref(), Some("marker.txt"));
    }
}
