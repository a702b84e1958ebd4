//! Cooperative task scheduler
//!
//! Tasks are explicit state machines stepped by engines. A task runs until it
//! waits on a condition mask, yields, finishes or aborts; there is no
//! preemption. Every task is stepped by at most one thread at a time, while
//! different tasks may be stepped in parallel by the workers of their engines.
//!
//! ```text
//!   Task::run(engine) ──► runnable ──step──► waiting ──signal──► runnable
//!                             ▲                │
//!                             └──── yield ─────┘      finish / abort ──► retired
//! ```

pub mod mutex;
pub mod queue;
pub mod state;
pub mod task;
pub mod worker;

pub use mutex::TaskMutex;
pub use queue::{Engine, EngineConfig, EngineStats, EngineStatsSnapshot};
pub use state::{check_layer, Condition, ConditionTable, StateLayer, StateType, TASK_STATE_END};
pub use task::{OnAbort, RunStatus, StateMachine, Task, TaskContext, TaskId};
pub use worker::{spawn_workers, Worker};

use thiserror::Error;

/// Engine priority tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Default)]
pub enum Priority {
    /// Background work such as cache I/O.
    Low = 0,
    /// Normal priority (default).
    #[default]
    Normal = 1,
    /// Work that feeds the render loop.
    High = 2,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Normal, Priority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// Scheduling errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The engine is at its admission limit; retry later.
    #[error("engine {engine} is full ({limit} active tasks)")]
    QueueFull { engine: String, limit: usize },

    #[error("engine {0} is stopped")]
    EngineStopped(String),

    #[error("{0} is already running")]
    AlreadyRunning(TaskId),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl SchedulerError {
    /// Whether the operation may succeed when retried later.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::QueueFull { .. })
    }
}

#[cfg(test)]
mod tests;
