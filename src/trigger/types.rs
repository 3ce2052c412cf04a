/// Trigger data model
///
/// These types are serialized into the trigger snapshot file, so field names
/// follow the camelCase wire format and instants serialize as ISO-8601.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Composite identity `(workspace, workflow path, node id)`
///
/// Rendered as `workspace:workflowPath:nodeId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey {
    pub workspace: String,
    pub workflow_path: String,
    pub node_id: String,
}

impl TriggerKey {
    pub fn new(
        workspace: impl Into<String>,
        workflow_path: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            workflow_path: workflow_path.into(),
            node_id: node_id.into(),
        }
    }

    /// Prefix shared by every trigger of one workflow
    pub fn workflow_prefix(workspace: &str, workflow_path: &str) -> String {
        format!("{workspace}:{workflow_path}:")
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.workspace, self.workflow_path, self.node_id)
    }
}

/// When a trigger fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// Fires at each occurrence of a cron schedule
    Cron { expression: String },
    /// Fires once the system has been idle for the threshold
    Idle {
        #[serde(rename = "thresholdMinutes")]
        threshold_minutes: u64,
    },
}

impl TriggerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerConfig::Cron { .. } => "cron",
            TriggerConfig::Idle { .. } => "idle",
        }
    }
}

/// A trigger as held by the registry
///
/// Callers only ever see copies; the registry owns the canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTrigger {
    /// Serialized [`TriggerKey`]
    pub key: String,
    pub workspace: String,
    pub workflow_path: String,
    pub node_id: String,
    pub label: String,
    pub config: TriggerConfig,
    pub enabled: bool,
    /// Only meaningful for cron triggers
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl RegisteredTrigger {
    pub fn is_cron(&self) -> bool {
        matches!(self.config, TriggerConfig::Cron { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.config, TriggerConfig::Idle { .. })
    }
}

/// On-disk snapshot of the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSnapshot {
    pub triggers: BTreeMap<String, RegisteredTrigger>,
    pub last_updated: DateTime<Utc>,
}
