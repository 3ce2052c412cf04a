/// Template substitution between workflow steps
///
/// A step may reference an earlier step's output as `{{ identifier.output }}`.
/// The identifier is matched against node ids first, then against normalized
/// labels (lowercase, each space → `_`). When several nodes share a
/// normalized label, the first one in node order that has produced output
/// wins. Unresolved references are left verbatim.

use crate::workflow::types::{ExecutionContext, WorkflowNode};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static OUTPUT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+)\.output\s*\}\}").expect("output reference pattern is valid")
});

/// Prompt markers that may precede an echoed command
const PROMPT_PREFIXES: [&str; 4] = ["$ ", "> ", "% ", "# "];

/// Lowercase with each space replaced by an underscore
pub fn normalize_label(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

impl ExecutionContext {
    /// Fresh context knowing the labels of `nodes`
    pub fn for_nodes(nodes: &[WorkflowNode]) -> Self {
        Self {
            labels: nodes
                .iter()
                .filter_map(|node| {
                    node.label
                        .as_deref()
                        .map(|label| (node.id.clone(), normalize_label(label)))
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn record_output(&mut self, node_id: &str, output: String) {
        self.outputs.insert(node_id.to_string(), output);
    }

    /// Output for an id or normalized label
    pub fn resolve(&self, identifier: &str) -> Option<&str> {
        if let Some(output) = self.outputs.get(identifier) {
            return Some(output.as_str());
        }

        let wanted = identifier.to_lowercase();
        self.labels
            .iter()
            .filter(|(_, label)| *label == wanted)
            .find_map(|(node_id, _)| self.outputs.get(node_id))
            .map(String::as_str)
    }
}

/// Replace every resolvable `{{ x.output }}` in `text`
pub fn substitute(text: &str, context: &ExecutionContext) -> String {
    OUTPUT_REF
        .replace_all(text, |caps: &Captures| {
            let identifier = &caps[1];
            match context.resolve(identifier) {
                Some(output) => output.to_string(),
                None => {
                    tracing::debug!("🔎 Unresolved template reference '{}'", &caps[0]);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Cleaned value of a step's transcript for downstream templates
///
/// Drops lines that echo one of `commands` (with or without a prompt marker),
/// strips a leading `$ ` prompt from the remaining lines and trims the result.
pub fn clean_output(raw: &str, commands: &[String]) -> String {
    raw.lines()
        .filter(|line| !is_command_echo(line.trim(), commands))
        .map(|line| line.strip_prefix("$ ").unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_command_echo(line: &str, commands: &[String]) -> bool {
    if line.is_empty() {
        return false;
    }
    let unprompted = PROMPT_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(str::trim)
        .unwrap_or(line);

    commands.iter().any(|command| {
        let command = command.trim();
        !command.is_empty() && (line == command || unprompted == command)
    })
}
