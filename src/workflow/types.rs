/// Core workflow type definitions
///
/// Workflows are node/edge graphs authored by an editor and stored as JSON.
/// On the wire a node is `{ id, type, data: { label?, nodeType, ...fields } }`;
/// in memory the `data` bag becomes a typed [`NodeKind`], with anything we do
/// not understand kept verbatim as [`NodeKind::Opaque`].

use crate::trigger::TriggerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// A complete workflow definition as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Human-readable workflow name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Nodes in editor (insertion) order
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    /// Directed connections between nodes
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    /// Default working directory for shell steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,
}

/// A single step of a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawWorkflowNode", into = "RawWorkflowNode")]
pub struct WorkflowNode {
    /// Unique node identifier within the workflow
    pub id: String,
    /// Editor-level node type (e.g. "custom"); not used for dispatch
    pub editor_type: Option<String>,
    /// Display label, also usable as a template identifier
    pub label: Option<String>,
    /// Typed node configuration
    pub kind: NodeKind,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            editor_type: None,
            label: None,
            kind,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label if set, otherwise the id
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Per-type node configuration
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Runs commands in a subprocess, in order, stopping at the first failure
    Shell(ShellConfig),
    /// Workflow entry point; pass-through at execution time
    Trigger(TriggerNodeConfig),
    /// Provides a working directory to downstream steps
    Workdir(WorkdirConfig),
    /// Delegated to an external agent runner
    Agent(AgentConfig),
    /// Delegated to an external script runner
    Script(ScriptConfig),
    /// Any other node type, kept verbatim
    Opaque { node_type: String, data: Value },
}

impl NodeKind {
    /// The `nodeType` tag
    pub fn type_name(&self) -> &str {
        match self {
            NodeKind::Shell(_) => "shell",
            NodeKind::Trigger(_) => "trigger",
            NodeKind::Workdir(_) => "workdir",
            NodeKind::Agent(_) => "agent",
            NodeKind::Script(_) => "script",
            NodeKind::Opaque { node_type, .. } => node_type,
        }
    }

    /// Parse a `data` bag for the given type tag
    ///
    /// Malformed data for a known type degrades to `Opaque` rather than failing
    /// the whole workflow.
    pub fn from_data(node_type: &str, data: &Value) -> NodeKind {
        let parsed = match node_type {
            "shell" => serde_json::from_value(data.clone()).map(NodeKind::Shell),
            "trigger" => serde_json::from_value(data.clone()).map(NodeKind::Trigger),
            "workdir" => serde_json::from_value(data.clone()).map(NodeKind::Workdir),
            "agent" => serde_json::from_value(data.clone()).map(NodeKind::Agent),
            "script" => serde_json::from_value(data.clone()).map(NodeKind::Script),
            _ => {
                return NodeKind::Opaque {
                    node_type: node_type.to_string(),
                    data: data.clone(),
                }
            }
        };

        parsed.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Malformed '{}' node data, treating as opaque: {}", node_type, e);
            NodeKind::Opaque {
                node_type: node_type.to_string(),
                data: data.clone(),
            }
        })
    }

    /// Serialize back to a `data` bag (without `label`/`nodeType`)
    fn to_data(&self) -> Value {
        let value = match self {
            NodeKind::Shell(config) => serde_json::to_value(config),
            NodeKind::Trigger(config) => serde_json::to_value(config),
            NodeKind::Workdir(config) => serde_json::to_value(config),
            NodeKind::Agent(config) => serde_json::to_value(config),
            NodeKind::Script(config) => serde_json::to_value(config),
            NodeKind::Opaque { data, .. } => Ok(data.clone()),
        };
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Apply `f` to every templated parameter (commands, prompts, paths, args)
    pub fn map_parameters(&self, f: &dyn Fn(&str) -> String) -> NodeKind {
        let map_opt = |s: &Option<String>| s.as_deref().map(f);
        match self {
            NodeKind::Shell(config) => NodeKind::Shell(ShellConfig {
                commands: config.commands.iter().map(|c| f(c.as_str())).collect(),
                path: map_opt(&config.path),
            }),
            NodeKind::Trigger(config) => NodeKind::Trigger(config.clone()),
            NodeKind::Workdir(config) => NodeKind::Workdir(WorkdirConfig {
                path: map_opt(&config.path),
            }),
            NodeKind::Agent(config) => NodeKind::Agent(AgentConfig {
                prompt: f(config.prompt.as_str()),
                path: map_opt(&config.path),
                ..config.clone()
            }),
            NodeKind::Script(config) => NodeKind::Script(ScriptConfig {
                path: map_opt(&config.path),
                args: config.args.iter().map(|a| f(a.as_str())).collect(),
            }),
            NodeKind::Opaque { node_type, data } => NodeKind::Opaque {
                node_type: node_type.clone(),
                data: map_json_strings(data, f),
            },
        }
    }
}

fn map_json_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s.as_str())),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_json_strings(v, f)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), map_json_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Shell step configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    /// One command per entry; a single string is split on newlines
    #[serde(default, deserialize_with = "deserialize_commands")]
    pub commands: Vec<String>,
    /// Working directory, absolute or relative to the workflow root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Commands may be authored as a list or as one multi-line string
#[derive(Deserialize)]
#[serde(untagged)]
enum CommandList {
    One(String),
    Many(Vec<String>),
}

fn deserialize_commands<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let commands = match Option::<CommandList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(CommandList::One(script)) => script.lines().map(str::to_string).collect(),
        Some(CommandList::Many(commands)) => commands,
    };
    Ok(commands
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect())
}

/// Trigger node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerNodeConfig {
    /// "cron", "idle" or "manual"; inferred from the other fields when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(default, alias = "schedule", skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_minutes: Option<u64>,
}

impl TriggerNodeConfig {
    /// Scheduling config for the trigger registry; `None` for manual triggers
    pub fn to_trigger_config(&self) -> Option<TriggerConfig> {
        let kind = self.trigger_type.as_deref().map(str::to_ascii_lowercase);
        let kind = kind.as_deref().or(if self.cron_expression.is_some() {
            Some("cron")
        } else if self.idle_minutes.is_some() {
            Some("idle")
        } else {
            None
        });

        match kind {
            Some("cron") => self.cron_expression.as_ref().map(|expression| TriggerConfig::Cron {
                expression: expression.clone(),
            }),
            Some("idle") => self.idle_minutes.map(|threshold_minutes| TriggerConfig::Idle {
                threshold_minutes,
            }),
            _ => None,
        }
    }
}

/// Workdir node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkdirConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Agent node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Script node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Wire shape of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawWorkflowNode {
    id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    node_type: Option<String>,
    #[serde(default)]
    data: Value,
}

impl From<RawWorkflowNode> for WorkflowNode {
    fn from(raw: RawWorkflowNode) -> Self {
        let label = raw
            .data
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string);
        let type_name = raw
            .data
            .get("nodeType")
            .and_then(Value::as_str)
            .or(raw.node_type.as_deref())
            .unwrap_or("unknown")
            .to_string();

        Self {
            kind: NodeKind::from_data(&type_name, &raw.data),
            id: raw.id,
            editor_type: raw.node_type,
            label,
        }
    }
}

impl From<WorkflowNode> for RawWorkflowNode {
    fn from(node: WorkflowNode) -> Self {
        let mut data = match node.kind.to_data() {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        data.insert(
            "nodeType".to_string(),
            Value::String(node.kind.type_name().to_string()),
        );
        if let Some(label) = node.label {
            data.insert("label".to_string(), Value::String(label));
        }

        Self {
            id: node.id,
            node_type: node.editor_type,
            data: Value::Object(data),
        }
    }
}

/// Connection between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
        }
    }
}

/// Per-run cache of node outputs used for template substitution
///
/// Built fresh for every run and discarded afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Cleaned output per node id
    pub outputs: HashMap<String, String>,
    /// `(node id, normalized label)` in node insertion order
    pub labels: Vec<(String, String)>,
    /// Directory provided by the most recent workdir step
    pub working_dir: Option<PathBuf>,
}

/// Lifecycle of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Outcome of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub fn running(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeStatus::Running,
            output: None,
            error: None,
            exit_code: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn complete(mut self, output: Option<String>) -> Self {
        self.status = NodeStatus::Completed;
        self.output = output;
        self.end_time = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: String, exit_code: Option<i32>, output: Option<String>) -> Self {
        self.status = NodeStatus::Failed;
        self.error = Some(error);
        self.exit_code = exit_code;
        self.output = output;
        self.end_time = Some(Utc::now());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }
}

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Input to the graph executor
#[derive(Debug, Clone, Default)]
pub struct WorkflowRunRequest {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub root_directory: Option<PathBuf>,
    pub start_node_id: Option<String>,
}

impl WorkflowRunRequest {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self {
            nodes,
            edges,
            ..Self::default()
        }
    }

    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
            root_directory: workflow.root_directory.as_ref().map(PathBuf::from),
            start_node_id: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_directory = Some(root.into());
        self
    }

    pub fn with_start_node(mut self, node_id: impl Into<String>) -> Self {
        self.start_node_id = Some(node_id.into());
        self
    }
}

/// Output of the graph executor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub success: bool,
    /// Per-node results in execution order
    pub results: Vec<NodeResult>,
    /// Node ids in the order they were dequeued
    pub execution_order: Vec<String>,
    /// The node that halted the run, if any
    pub failed_node_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowRunResult {
    /// The failing node's result, if the run failed
    pub fn failure(&self) -> Option<&NodeResult> {
        let failed = self.failed_node_id.as_deref()?;
        self.results.iter().find(|r| r.node_id == failed)
    }
}
