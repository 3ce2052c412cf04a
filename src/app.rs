/// Host application setup and initialization
///
/// Wires together all components: trigger registry and its snapshot, idle
/// tracker, scheduler, execution engine and workflow storage. Trigger nodes
/// found in workflow files are synchronised into the registry, and fired
/// triggers run their workflow starting from the trigger node.

use crate::{
    config::Config,
    runtime::{
        engine::ExecutionEngine,
        executor::NodeExecutor,
        scheduler::{TriggerHandler, TriggerScheduler},
    },
    trigger::{
        Clock, IdleTracker, RegisteredTrigger, SystemClock, TriggerKey, TriggerRegistry,
        TriggerStorage,
    },
    workflow::{NodeKind, WorkflowRunRequest, WorkflowRunResult, WorkflowStorage},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Fully wired application
pub struct App {
    pub config: Config,
    pub registry: Arc<TriggerRegistry>,
    pub idle: Arc<IdleTracker>,
    pub scheduler: Arc<TriggerScheduler>,
    pub runner: Arc<WorkflowRunner>,
    pub workflows: WorkflowStorage,
}

/// Create the application with the system clock and built-in node executors
pub async fn create_app(config: Config) -> Result<App> {
    App::build(config, Arc::new(SystemClock), NodeExecutor::new()).await
}

impl App {
    /// Create the application with an explicit clock and node executor
    pub async fn build(config: Config, clock: Arc<dyn Clock>, executor: NodeExecutor) -> Result<App> {
        tracing::info!("📊 Initializing trigger registry");
        let trigger_storage = config.scheduler.trigger_state_file.clone().map(TriggerStorage::new);
        match &trigger_storage {
            Some(storage) => tracing::info!("💾 Trigger state file: {}", storage.path().display()),
            None => tracing::info!("💾 Trigger persistence disabled"),
        }
        let registry = Arc::new(TriggerRegistry::with_storage(Arc::clone(&clock), trigger_storage));
        registry.load();

        let idle = Arc::new(IdleTracker::new(Arc::clone(&clock)));

        tracing::info!("🚀 Initializing execution engine");
        let engine = Arc::new(ExecutionEngine::new(Arc::new(executor)));

        let workflows = WorkflowStorage::new(
            config.workspace.root.clone(),
            config.workspace.workflows_dir.clone(),
        );

        tracing::info!("⏰ Initializing trigger scheduler");
        let scheduler = Arc::new(TriggerScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&idle),
            clock,
        ));
        let runner = Arc::new(WorkflowRunner::new(
            workflows.clone(),
            engine,
            Arc::clone(&idle),
        ));
        scheduler.set_handler(runner.clone()).await;

        tracing::info!("✅ Application initialized successfully");
        Ok(App {
            config,
            registry,
            idle,
            scheduler,
            runner,
            workflows,
        })
    }

    /// Register every cron/idle trigger node of every workflow file
    ///
    /// Unchanged triggers are left alone so their enabled flag survives.
    /// Entries of this workspace whose node no longer exists are removed;
    /// entries of workflows that failed to load are kept. Returns the number
    /// of active trigger nodes found.
    pub async fn sync_workflows(&self) -> Result<usize> {
        let workspace = &self.config.workspace.name;
        let paths = self
            .workflows
            .list_workflow_paths()
            .await
            .context("failed to list workflows")?;

        let mut seen = HashSet::new();
        let mut unreadable = HashSet::new();

        for path in paths {
            let workflow = match self.workflows.load_workflow(&path).await {
                Ok(workflow) => workflow,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping workflow {}: {}", path, e);
                    unreadable.insert(path);
                    continue;
                }
            };

            for node in &workflow.nodes {
                let NodeKind::Trigger(trigger) = &node.kind else {
                    continue;
                };
                let Some(config) = trigger.to_trigger_config() else {
                    tracing::debug!("⏭️ Trigger {} in {} is manual or incomplete", node.id, path);
                    continue;
                };

                let key = TriggerKey::new(workspace, &path, &node.id).to_string();
                let label = node.display_name();
                let unchanged = self
                    .registry
                    .get(&key)
                    .is_some_and(|existing| existing.config == config && existing.label == label);
                if !unchanged {
                    self.registry.register(workspace, &path, &node.id, label, config);
                }
                seen.insert(key);
            }
        }

        for trigger in self.registry.list_by_workspace(workspace) {
            if !seen.contains(&trigger.key) && !unreadable.contains(&trigger.workflow_path) {
                tracing::info!("🧹 Removing stale trigger {}", trigger.key);
                self.registry.unregister(&trigger.key);
            }
        }

        tracing::info!("🔄 Synchronised {} trigger(s) for workspace '{}'", seen.len(), workspace);
        Ok(seen.len())
    }

    /// Run a workflow on demand
    pub async fn run_workflow(&self, workflow_path: &str, start_node_id: Option<&str>) -> Result<WorkflowRunResult> {
        self.runner.run(workflow_path, start_node_id).await
    }
}

/// Trigger handler that runs the fired trigger's workflow
///
/// Owns the busy/idle transitions: the system is busy while any run is in
/// flight and goes idle again when the last one finishes.
pub struct WorkflowRunner {
    workflows: WorkflowStorage,
    engine: Arc<ExecutionEngine>,
    idle: Arc<IdleTracker>,
    in_flight: AtomicUsize,
}

impl WorkflowRunner {
    pub fn new(workflows: WorkflowStorage, engine: Arc<ExecutionEngine>, idle: Arc<IdleTracker>) -> Self {
        Self {
            workflows,
            engine,
            idle,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of runs currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Load `workflow_path` and execute it, optionally from one start node
    pub async fn run(&self, workflow_path: &str, start_node_id: Option<&str>) -> Result<WorkflowRunResult> {
        let workflow = self
            .workflows
            .load_workflow(workflow_path)
            .await
            .with_context(|| format!("failed to load workflow {workflow_path}"))?;

        let root: PathBuf = match &workflow.root_directory {
            Some(dir) => self.workflows.root().join(dir),
            None => self.workflows.root().to_path_buf(),
        };
        let mut request = WorkflowRunRequest::from_workflow(&workflow).with_root(root);
        if let Some(start) = start_node_id {
            request = request.with_start_node(start);
        }

        let _busy = BusyGuard::enter(self);
        let result = self
            .engine
            .execute(request)
            .await
            .with_context(|| format!("workflow {workflow_path} could not be executed"))?;
        Ok(result)
    }
}

#[async_trait]
impl TriggerHandler for WorkflowRunner {
    async fn on_trigger(&self, trigger: RegisteredTrigger) -> Result<()> {
        tracing::info!(
            "▶️ Running {} from trigger '{}' ({})",
            trigger.workflow_path,
            trigger.label,
            trigger.node_id
        );

        let result = self.run(&trigger.workflow_path, Some(&trigger.node_id)).await?;
        if let Some(failure) = result.failure() {
            anyhow::bail!(
                "workflow {} failed at node '{}' (exit code {:?}): {}",
                trigger.workflow_path,
                failure.node_id,
                failure.exit_code,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }
}

/// Marks the system busy for the lifetime of one run
struct BusyGuard<'a> {
    runner: &'a WorkflowRunner,
}

impl<'a> BusyGuard<'a> {
    fn enter(runner: &'a WorkflowRunner) -> Self {
        runner.in_flight.fetch_add(1, Ordering::SeqCst);
        runner.idle.set_idle(false);
        Self { runner }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.runner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.runner.idle.set_idle(true);
        }
    }
}

/// Start the host with the given configuration
///
/// Synchronises triggers, starts the scheduler and runs until Ctrl-C.
pub async fn start(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_max_level(config.logging.max_level())
        .init();

    tracing::info!("Starting autoflow...");

    let app = create_app(config).await?;
    app.sync_workflows().await?;

    app.idle.set_idle(true);
    app.scheduler.start(app.config.scheduler.check_interval());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down autoflow...");
    app.scheduler.stop();
    app.registry.persist();
    Ok(())
}
