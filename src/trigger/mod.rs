/// Trigger Layer
///
/// Decides *when* a workflow should run. It provides:
/// - A replaceable clock for deterministic timing
/// - Cron expression evaluation (UTC)
/// - The trigger registry and its JSON snapshot
/// - System-wide idle tracking

// Time source shared by registry, idle tracker and scheduler
pub mod clock;

// Cron expression parsing and next-occurrence evaluation
pub mod cron;

// Trigger key, config and record types
pub mod types;

// Edge-triggered idle/busy state
pub mod idle;

// Snapshot persistence for the registry
pub mod storage;

// Lock-free registry of cron and idle triggers
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use idle::{IdleState, IdleTracker};
pub use registry::TriggerRegistry;
pub use storage::TriggerStorage;
pub use types::{RegisteredTrigger, TriggerConfig, TriggerKey, TriggerSnapshot};
