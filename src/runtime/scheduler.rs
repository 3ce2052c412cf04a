/// Background trigger scheduler service
///
/// Ties the trigger registry and idle tracker to a single fire handler. One
/// check cycle fires every due cron trigger and at most one due idle trigger,
/// then persists the registry if anything fired. A tokio interval drives the
/// cycles; a cycle always completes before the next one can start.

use crate::trigger::{
    clock::Clock,
    idle::IdleTracker,
    registry::TriggerRegistry,
    types::RegisteredTrigger,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::seq::SliceRandom;
use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::MissedTickBehavior,
};

/// Callback invoked when a trigger fires
///
/// Errors and panics are caught by the scheduler and never affect other
/// triggers or the scheduling loop.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn on_trigger(&self, trigger: RegisteredTrigger) -> anyhow::Result<()>;
}

/// Periodic scheduler for cron and idle triggers
pub struct TriggerScheduler {
    registry: Arc<TriggerRegistry>,
    idle: Arc<IdleTracker>,
    clock: Arc<dyn Clock>,
    /// Single fire handler; `None` marks triggers fired without side effects
    handler: RwLock<Option<Arc<dyn TriggerHandler>>>,
    /// Serialises check cycles (timer ticks and manual calls)
    check_lock: tokio::sync::Mutex<()>,
    /// The running timer loop, if any
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerScheduler {
    pub fn new(registry: Arc<TriggerRegistry>, idle: Arc<IdleTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            idle,
            clock,
            handler: RwLock::new(None),
            check_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    pub fn idle(&self) -> &Arc<IdleTracker> {
        &self.idle
    }

    /// Install the fire handler, replacing any previous one
    pub async fn set_handler(&self, handler: Arc<dyn TriggerHandler>) {
        *self.handler.write().await = Some(handler);
    }

    pub async fn clear_handler(&self) {
        *self.handler.write().await = None;
    }

    /// Run one check cycle and return the triggers that fired
    pub async fn check_and_fire(&self) -> Vec<RegisteredTrigger> {
        let _cycle = self.check_lock.lock().await;
        let now = self.clock.now();
        let handler = self.handler.read().await.clone();
        let mut fired = Vec::new();

        let due_cron = self.registry.due_cron_triggers(now);
        if !due_cron.is_empty() {
            tracing::debug!("⏰ {} cron trigger(s) due at {}", due_cron.len(), now);
        }
        for trigger in due_cron {
            fired.push(self.fire(trigger, handler.as_ref(), now).await);
        }

        let due_idle = self.registry.due_idle_triggers(&self.idle.state(), now);
        let chosen = {
            let mut rng = rand::thread_rng();
            due_idle.choose(&mut rng).cloned()
        };
        if let Some(trigger) = chosen {
            tracing::debug!(
                "💤 {} idle trigger(s) due, picked {}",
                due_idle.len(),
                trigger.key
            );
            fired.push(self.fire(trigger, handler.as_ref(), now).await);
        }

        if !fired.is_empty() {
            self.registry.persist();
        }
        fired
    }

    /// Invoke the handler in isolation, then record the fire
    async fn fire(
        &self,
        trigger: RegisteredTrigger,
        handler: Option<&Arc<dyn TriggerHandler>>,
        now: DateTime<Utc>,
    ) -> RegisteredTrigger {
        tracing::info!("🔔 Firing {} trigger {}", trigger.config.kind(), trigger.key);

        if let Some(handler) = handler {
            match AssertUnwindSafe(handler.on_trigger(trigger.clone()))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => tracing::debug!("✅ Trigger {} handled", trigger.key),
                Ok(Err(e)) => tracing::error!("❌ Trigger {} handler failed: {:#}", trigger.key, e),
                Err(_) => tracing::error!("💥 Trigger {} handler panicked", trigger.key),
            }
        }

        self.registry.mark_fired(&trigger.key, now).unwrap_or(trigger)
    }

    /// Start the periodic check loop, replacing any loop already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.take() {
            tracing::debug!("🔁 Replacing running scheduler loop");
            previous.abort();
        }

        tracing::info!("⏰ Starting trigger scheduler (every {:?})", interval);
        let scheduler = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match AssertUnwindSafe(scheduler.check_and_fire()).catch_unwind().await {
                    Ok(fired) if !fired.is_empty() => {
                        tracing::debug!("🔔 Check cycle fired {} trigger(s)", fired.len());
                    }
                    Ok(_) => {}
                    Err(_) => tracing::error!("💥 Check cycle panicked; waiting for the next tick"),
                }
            }
        }));
    }

    /// Stop the periodic loop; no-op when not running
    pub fn stop(&self) {
        let previous = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = previous {
            handle.abort();
            tracing::info!("⏹️ Trigger scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
