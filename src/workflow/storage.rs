/// File-backed workflow storage
///
/// Workflows live as JSON documents under a workspace root. The workflow path
/// used in trigger keys is the file path relative to that root, with `/`
/// separators so keys are stable across platforms.

use crate::{error::WorkflowError, workflow::types::Workflow};
use std::path::{Path, PathBuf};

/// Reads workflow definitions from a workspace directory
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    /// Workspace root; workflow paths are relative to it
    root: PathBuf,
    /// Directory scanned for `*.json` workflows, relative to `root`
    workflows_dir: PathBuf,
}

impl WorkflowStorage {
    pub fn new(root: impl Into<PathBuf>, workflows_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workflows_dir: workflows_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute (or root-joined) path of a workflow
    pub fn resolve(&self, workflow_path: &str) -> PathBuf {
        self.root.join(workflow_path)
    }

    /// Load and parse one workflow
    pub async fn load_workflow(&self, workflow_path: &str) -> Result<Workflow, WorkflowError> {
        let path = self.resolve(workflow_path);
        let data = tokio::fs::read(&path).await.map_err(|e| WorkflowError::Load {
            path: path.clone(),
            message: e.to_string(),
        })?;

        serde_json::from_slice(&data).map_err(|e| WorkflowError::Load {
            path,
            message: e.to_string(),
        })
    }

    /// Relative paths of every `*.json` file in the workflows directory
    ///
    /// A missing directory yields an empty list. Results are sorted.
    pub async fn list_workflow_paths(&self) -> Result<Vec<String>, WorkflowError> {
        let dir = self.root.join(&self.workflows_dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("📂 Workflows directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(WorkflowError::Load {
                    path: dir,
                    message: e.to_string(),
                })
            }
        };

        let mut paths = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(WorkflowError::Load {
                        path: dir,
                        message: e.to_string(),
                    })
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                paths.push(relative_key(&self.workflows_dir.join(name)));
            }
        }

        paths.sort();
        Ok(paths)
    }
}

fn relative_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
