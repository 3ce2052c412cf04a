/// Configuration management for the autoflow host
///
/// Handles scheduler timing, trigger state persistence, the workspace whose
/// workflows are scheduled, and logging verbosity. Everything comes from
/// environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trigger scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Workspace configuration
    pub workspace: WorkspaceConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Trigger scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between check cycles
    pub check_interval_ms: u64,
    /// Trigger snapshot file; `None` disables persistence
    pub trigger_state_file: Option<PathBuf>,
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Workspace whose workflows get their trigger nodes scheduled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Workspace name, the first segment of every trigger key
    pub name: String,
    /// Root directory; workflow paths and relative node paths resolve against it
    pub root: PathBuf,
    /// Directory under `root` scanned for `*.json` workflows
    pub workflows_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
}

impl LoggingConfig {
    /// Parsed level, falling back to INFO for unknown values
    pub fn max_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

const DEFAULT_CHECK_INTERVAL_MS: u64 = 30_000;

impl Config {
    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let persistence_disabled = lookup("AUTOFLOW_DISABLE_PERSISTENCE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let trigger_state_file = if persistence_disabled {
            None
        } else {
            lookup("AUTOFLOW_TRIGGERS_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or_else(|| default_data_dir(&lookup).map(|dir| dir.join("autoflow").join("triggers.json")))
        };

        Self {
            scheduler: SchedulerConfig {
                check_interval_ms: lookup("AUTOFLOW_CHECK_INTERVAL_MS")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_CHECK_INTERVAL_MS),
                trigger_state_file,
            },
            workspace: WorkspaceConfig {
                name: lookup("AUTOFLOW_WORKSPACE").unwrap_or_else(|| "default".to_string()),
                root: lookup("AUTOFLOW_WORKSPACE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(".")),
                workflows_dir: lookup("AUTOFLOW_WORKFLOWS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("workflows")),
            },
            logging: LoggingConfig {
                level: lookup("AUTOFLOW_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Per-user data directory for the current platform
fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if cfg!(windows) {
        return lookup("APPDATA").map(PathBuf::from);
    }
    if cfg!(target_os = "macos") {
        return lookup("HOME").map(|home| PathBuf::from(home).join("Library").join("Application Support"));
    }
    lookup("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".local").join("share")))
}
