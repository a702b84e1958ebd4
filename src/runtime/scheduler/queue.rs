//! Engines: runnable queues that step tasks.
//!
//! An engine keeps every task that was admitted and has not reached a terminal
//! state in its active set, and the tasks that can make progress in a lock-free
//! runnable queue. Waiting tasks are only in the active set and cost nothing.
//! An engine is driven either by hand (`step_all`) or by worker threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::task::{StepOutcome, Task, TaskId};
use super::SchedulerError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time budget of one `step_all` pass; `None` runs until no task is runnable.
    pub max_duration: Option<Duration>,
    /// Admission limit on active tasks; 0 means unbounded.
    pub max_queue_size: usize,
    /// How long an idle worker parks before looking again.
    pub idle_timeout: Duration,
    /// How long a caller keeps retrying admission while no task of the
    /// engine ends.
    pub admission_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_duration: None,
            max_queue_size: 0,
            idle_timeout: Duration::from_millis(10),
            admission_timeout: Duration::from_secs(5),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Tasks admitted with `run`.
    pub tasks_run: AtomicUsize,
    /// Calls of `Task::step`.
    pub steps: AtomicUsize,
    pub yields: AtomicUsize,
    pub waits: AtomicUsize,
    pub finished: AtomicUsize,
    pub aborted: AtomicUsize,
}

impl EngineStats {
    #[inline]
    fn record_run(&self) {
        self.tasks_run.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_step(
        &self,
        outcome: StepOutcome,
    ) {
        self.steps.fetch_add(1, Ordering::AcqRel);
        let counter = match outcome {
            StepOutcome::Yielded => &self.yields,
            StepOutcome::Waiting => &self.waits,
            StepOutcome::Finished => &self.finished,
            StepOutcome::Aborted => &self.aborted,
            StepOutcome::Runnable => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// A plain copy of the counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            tasks_run: self.tasks_run.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub tasks_run: usize,
    pub steps: usize,
    pub yields: usize,
    pub waits: usize,
    pub finished: usize,
    pub aborted: usize,
}

/// A queue of tasks stepped by one or more threads.
#[derive(Debug)]
pub struct Engine {
    name: String,
    config: EngineConfig,
    runnable: SegQueue<Arc<Task>>,
    active: Mutex<IndexMap<TaskId, Arc<Task>>>,
    in_flight: AtomicUsize,
    stopped: AtomicBool,
    idle: Mutex<()>,
    wake: Condvar,
    stats: EngineStats,
}

impl Engine {
    /// Create an engine with default configuration.
    #[inline]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_config(name, EngineConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            runnable: SegQueue::new(),
            active: Mutex::new(IndexMap::new()),
            in_flight: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            idle: Mutex::new(()),
            wake: Condvar::new(),
            stats: EngineStats::default(),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    fn queue_full(&self) -> SchedulerError {
        SchedulerError::QueueFull {
            engine: self.name.clone(),
            limit: self.config.max_queue_size,
        }
    }

    /// Fails with `QueueFull` unless `count` more tasks fit under the
    /// admission limit right now.
    pub fn check_room(
        &self,
        count: usize,
    ) -> Result<(), SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::EngineStopped(self.name.clone()));
        }
        let limit = self.config.max_queue_size;
        if limit > 0 && self.active.lock().len() + count > limit {
            return Err(self.queue_full());
        }
        Ok(())
    }

    /// Tasks of this engine that finished or aborted so far.
    pub fn ended_tasks(&self) -> usize {
        self.stats.finished.load(Ordering::Acquire) + self.stats.aborted.load(Ordering::Acquire)
    }

    /// Register a task that is about to run on this engine.
    pub(crate) fn admit(
        &self,
        task: &Arc<Task>,
    ) -> Result<(), SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::EngineStopped(self.name.clone()));
        }
        let mut active = self.active.lock();
        if self.config.max_queue_size > 0 && active.len() >= self.config.max_queue_size {
            return Err(self.queue_full());
        }
        active.insert(task.id(), task.clone());
        self.stats.record_run();
        Ok(())
    }

    /// Make a task runnable.
    pub(crate) fn push(
        &self,
        task: Arc<Task>,
    ) {
        self.runnable.push(task);
        let _guard = self.idle.lock();
        self.wake.notify_one();
    }

    /// Drop a task that reached a terminal state.
    pub(crate) fn retire(
        &self,
        id: TaskId,
    ) {
        self.active.lock().shift_remove(&id);
    }

    /// Step runnable tasks until none is left or `budget` ran out.
    ///
    /// Tasks that yield are queued again only after the pass, so a yielding
    /// task cannot starve the others. Returns the number of steps taken.
    pub fn step_all(
        self: &Arc<Self>,
        budget: Option<Duration>,
    ) -> usize {
        let start = Instant::now();
        let mut yielded = Vec::new();
        let mut steps = 0;

        // Held for the whole pass: yielded tasks are neither runnable nor idle.
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        while let Some(task) = self.runnable.pop() {
            let outcome = task.step(self);
            self.stats.record_step(outcome);
            match outcome {
                StepOutcome::Yielded => yielded.push(task),
                StepOutcome::Runnable => self.runnable.push(task),
                StepOutcome::Waiting | StepOutcome::Finished | StepOutcome::Aborted => {}
            }
            steps += 1;

            if budget.is_some_and(|budget| start.elapsed() >= budget) {
                trace!(engine = %self.name, steps, "time budget exhausted");
                break;
            }
        }

        for task in yielded {
            self.push(task);
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        steps
    }

    /// Step with the configured time budget.
    #[inline]
    pub fn step(self: &Arc<Self>) -> usize {
        self.step_all(self.config.max_duration)
    }

    /// Park the calling thread until a task becomes runnable or `timeout` passed.
    pub fn park(
        &self,
        timeout: Duration,
    ) {
        let mut guard = self.idle.lock();
        if self.runnable.is_empty() && !self.is_stopped() {
            self.wake.wait_for(&mut guard, timeout);
        }
    }

    #[inline]
    pub fn has_runnable(&self) -> bool {
        !self.runnable.is_empty()
    }

    #[inline]
    pub fn runnable_len(&self) -> usize {
        self.runnable.len()
    }

    /// Number of admitted tasks that are not terminal yet.
    #[inline]
    pub fn active_len(&self) -> usize {
        self.active.lock().len()
    }

    /// No runnable task and no pass in progress.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0 && self.runnable.is_empty()
    }

    /// Total number of steps taken so far.
    #[inline]
    pub fn steps_taken(&self) -> usize {
        self.stats.steps.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Refuse new tasks and wake every parked worker.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _guard = self.idle.lock();
        self.wake.notify_all();
    }

    /// Request an abort of every active task.
    pub fn abort_all(&self) {
        let tasks: Vec<Arc<Task>> = self.active.lock().values().cloned().collect();
        if !tasks.is_empty() {
            debug!(engine = %self.name, count = tasks.len(), "aborting active tasks");
        }
        for task in tasks {
            task.abort();
        }
    }
}
