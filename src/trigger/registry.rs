/// In-memory trigger registry with optional snapshot persistence
///
/// Uses ArcSwap so readers (due-checks, listings) take lock-free snapshots while
/// every mutation goes through `rcu`, which serialises concurrent writers and
/// never loses an update to `nextRun`/`lastRun`. The registry is the only owner
/// of trigger records; everything handed out is a copy.

use crate::trigger::{
    clock::Clock,
    cron,
    idle::IdleState,
    storage::TriggerStorage,
    types::{RegisteredTrigger, TriggerConfig, TriggerKey},
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use std::{collections::BTreeMap, sync::Arc};

type TriggerMap = BTreeMap<String, RegisteredTrigger>;

/// Registry of cron and idle triggers keyed by `workspace:path:nodeId`
pub struct TriggerRegistry {
    /// Key-ordered so due-lists come out in a deterministic order
    triggers: ArcSwap<TriggerMap>,
    clock: Arc<dyn Clock>,
    /// `None` disables persistence (tests, dry runs)
    storage: Option<TriggerStorage>,
}

impl TriggerRegistry {
    /// Registry without persistence
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_storage(clock, None)
    }

    pub fn with_storage(clock: Arc<dyn Clock>, storage: Option<TriggerStorage>) -> Self {
        Self {
            triggers: ArcSwap::new(Arc::new(BTreeMap::new())),
            clock,
            storage,
        }
    }

    /// Replace in-memory state with the persisted snapshot
    ///
    /// A missing file leaves the registry empty. Any other failure is logged
    /// and the registry keeps its current contents.
    pub fn load(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        match storage.load() {
            Ok(Some(snapshot)) => {
                let now = self.clock.now();
                let mut triggers = snapshot.triggers;
                for trigger in triggers.values_mut() {
                    if let (TriggerConfig::Cron { expression }, None) = (&trigger.config, trigger.next_run) {
                        trigger.next_run = compute_next_run(expression, now, &trigger.key);
                    }
                }
                tracing::info!(
                    "📥 Loaded {} triggers from {} (last updated {})",
                    triggers.len(),
                    storage.path().display(),
                    snapshot.last_updated.to_rfc3339()
                );
                self.triggers.store(Arc::new(triggers));
            }
            Ok(None) => {
                tracing::info!("📭 No trigger state at {}, starting empty", storage.path().display());
            }
            Err(e) => {
                tracing::warn!("⚠️ Ignoring unreadable trigger state: {}", e);
            }
        }
    }

    /// Write the current state to disk; failures are logged, never raised
    pub fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        if let Err(e) = storage.save(&self.triggers.load(), self.clock.now()) {
            tracing::warn!("⚠️ Failed to persist trigger state: {}", e);
        }
    }

    /// Add or overwrite a trigger
    ///
    /// Re-registering a key replaces its label and config but keeps `last_run`.
    /// An invalid cron expression is accepted with `next_run = None`.
    pub fn register(
        &self,
        workspace: &str,
        workflow_path: &str,
        node_id: &str,
        label: &str,
        config: TriggerConfig,
    ) -> RegisteredTrigger {
        let key = TriggerKey::new(workspace, workflow_path, node_id).to_string();
        let next_run = match &config {
            TriggerConfig::Cron { expression } => compute_next_run(expression, self.clock.now(), &key),
            TriggerConfig::Idle { .. } => None,
        };

        let record = RegisteredTrigger {
            key: key.clone(),
            workspace: workspace.to_string(),
            workflow_path: workflow_path.to_string(),
            node_id: node_id.to_string(),
            label: label.to_string(),
            config,
            enabled: true,
            next_run,
            last_run: None,
        };

        let mut last_run = None;
        self.triggers.rcu(|current| {
            let mut triggers = TriggerMap::clone(current);
            last_run = current.get(&key).and_then(|previous| previous.last_run);
            triggers.insert(key.clone(), RegisteredTrigger { last_run, ..record.clone() });
            triggers
        });

        tracing::info!(
            "📌 Registered {} trigger {} ({})",
            record.config.kind(),
            key,
            next_run
                .map(|t| format!("next run {}", t.to_rfc3339()))
                .unwrap_or_else(|| "no scheduled run".to_string())
        );
        self.persist();

        RegisteredTrigger { last_run, ..record }
    }

    /// Remove one trigger; `true` iff it existed
    pub fn unregister(&self, key: &str) -> bool {
        let mut removed = false;
        self.triggers.rcu(|current| {
            let mut triggers = TriggerMap::clone(current);
            removed = triggers.remove(key).is_some();
            triggers
        });

        if removed {
            tracing::info!("🗑️ Unregistered trigger {}", key);
            self.persist();
        }
        removed
    }

    /// Remove every trigger belonging to one workflow; returns how many
    pub fn unregister_workflow(&self, workspace: &str, workflow_path: &str) -> usize {
        let prefix = TriggerKey::workflow_prefix(workspace, workflow_path);
        let mut removed = 0;
        self.triggers.rcu(|current| {
            let mut triggers = TriggerMap::clone(current);
            let before = triggers.len();
            triggers.retain(|key, _| !key.starts_with(&prefix));
            removed = before - triggers.len();
            triggers
        });

        if removed > 0 {
            tracing::info!("🗑️ Unregistered {} triggers for {}", removed, prefix.trim_end_matches(':'));
            self.persist();
        }
        removed
    }

    /// Drop every trigger
    pub fn clear(&self) {
        self.triggers.store(Arc::new(BTreeMap::new()));
        self.persist();
    }

    pub fn get(&self, key: &str) -> Option<RegisteredTrigger> {
        self.triggers.load().get(key).cloned()
    }

    pub fn list_all(&self) -> Vec<RegisteredTrigger> {
        self.triggers.load().values().cloned().collect()
    }

    pub fn list_by_workspace(&self, workspace: &str) -> Vec<RegisteredTrigger> {
        self.triggers
            .load()
            .values()
            .filter(|t| t.workspace == workspace)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.triggers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.load().is_empty()
    }

    /// Enable or disable; `false` if the key is unknown
    ///
    /// Leaves `next_run` and `last_run` untouched.
    pub fn set_enabled(&self, key: &str, enabled: bool) -> bool {
        let mut found = false;
        self.triggers.rcu(|current| {
            let mut triggers = TriggerMap::clone(current);
            found = match triggers.get_mut(key) {
                Some(trigger) => {
                    trigger.enabled = enabled;
                    true
                }
                None => false,
            };
            triggers
        });

        if found {
            tracing::info!("🔀 Trigger {} {}", key, if enabled { "enabled" } else { "disabled" });
            self.persist();
        }
        found
    }

    /// Enabled cron triggers whose `next_run <= now`
    pub fn due_cron_triggers(&self, now: DateTime<Utc>) -> Vec<RegisteredTrigger> {
        self.triggers
            .load()
            .values()
            .filter(|t| t.enabled && t.is_cron())
            .filter(|t| t.next_run.is_some_and(|next| next <= now))
            .cloned()
            .collect()
    }

    /// Enabled idle triggers whose threshold has elapsed since the idle start
    ///
    /// Empty while busy. A zero-minute threshold is due as soon as the system
    /// goes idle.
    pub fn due_idle_triggers(&self, idle: &IdleState, now: DateTime<Utc>) -> Vec<RegisteredTrigger> {
        if !idle.is_idle() {
            return Vec::new();
        }
        let elapsed = idle.idle_duration(now);

        self.triggers
            .load()
            .values()
            .filter(|t| t.enabled)
            .filter(|t| match t.config {
                TriggerConfig::Idle { threshold_minutes } => {
                    let threshold = i64::try_from(threshold_minutes)
                        .ok()
                        .and_then(Duration::try_minutes);
                    threshold.is_some_and(|threshold| threshold <= elapsed)
                }
                TriggerConfig::Cron { .. } => false,
            })
            .cloned()
            .collect()
    }

    /// Record a fire at `now`
    ///
    /// Sets `last_run`; cron triggers get `next_run` recomputed from `now`
    /// (cleared if the expression no longer yields an occurrence). Returns the
    /// updated copy, or `None` if the trigger was removed in the meantime.
    pub fn mark_fired(&self, key: &str, now: DateTime<Utc>) -> Option<RegisteredTrigger> {
        let mut updated = None;
        self.triggers.rcu(|current| {
            let mut triggers = TriggerMap::clone(current);
            updated = triggers.get_mut(key).map(|trigger| {
                trigger.last_run = Some(now);
                if let TriggerConfig::Cron { expression } = &trigger.config {
                    trigger.next_run = compute_next_run(expression, now, key);
                }
                trigger.clone()
            });
            triggers
        });
        updated
    }
}

fn compute_next_run(expression: &str, from: DateTime<Utc>, key: &str) -> Option<DateTime<Utc>> {
    match cron::next_occurrence(expression, from) {
        Ok(next) => Some(next),
        Err(e) => {
            tracing::warn!("⚠️ Trigger {} has no next run: {}", key, e);
            None
        }
    }
}
