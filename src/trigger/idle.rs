/// System-wide idle tracking
///
/// Idle thresholds are measured from the most recent busy→idle edge. Repeated
/// `set_idle(true)` calls keep the original start; a single busy pulse resets
/// the accumulated idle time for every idle trigger at once.

use crate::trigger::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Snapshot of the idle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleState {
    pub idle_since: Option<DateTime<Utc>>,
}

impl IdleState {
    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    /// Elapsed idle time at `now`; zero when busy
    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        match self.idle_since {
            Some(since) if now > since => now - since,
            _ => Duration::zero(),
        }
    }
}

/// Edge-triggered idle/busy tracker
pub struct IdleTracker {
    clock: Arc<dyn Clock>,
    state: Mutex<IdleState>,
}

impl IdleTracker {
    /// Starts busy
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(IdleState::default()),
        }
    }

    pub fn set_idle(&self, idle: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match (state.idle_since, idle) {
            (None, true) => {
                let now = self.clock.now();
                state.idle_since = Some(now);
                tracing::debug!("💤 System became idle at {}", now.to_rfc3339());
            }
            (Some(since), false) => {
                state.idle_since = None;
                tracing::debug!("⚙️ System became busy (was idle since {})", since.to_rfc3339());
            }
            _ => {}
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        self.state().idle_duration(now)
    }

    pub fn state(&self) -> IdleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
