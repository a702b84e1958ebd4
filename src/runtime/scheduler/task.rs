//! Stateful tasks.
//!
//! A [`Task`] wraps a [`StateMachine`]. The engine that owns the task calls
//! [`StateMachine::multiplex`] with the current run state; the machine records
//! what should happen next through the [`TaskContext`]:
//!
//! - nothing: the new (or same) state is run again right away,
//! - [`TaskContext::wait`]: suspend until every bit of the mask was signalled,
//! - [`TaskContext::yield_now`]: run again on the next pass of the engine,
//! - [`TaskContext::finish`] / [`TaskContext::abort`]: terminal.
//!
//! Signals that arrive while a task is not waiting on them are remembered, so a
//! `signal` that races ahead of the matching `wait` is never lost.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::queue::Engine;
use super::state::{Condition, StateType};
use super::SchedulerError;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// The behaviour of a task: one run state at a time.
pub trait StateMachine: Send + 'static {
    /// Name of the task type, used in log output.
    fn task_name(&self) -> &'static str;

    /// Name of a run state, used in log output.
    fn state_name(
        &self,
        state: StateType,
    ) -> &'static str;

    /// The state the first step starts in.
    fn initial_state(&self) -> StateType;

    /// Run one state.
    ///
    /// An `Err` is logged and handled as if the task called `abort()`.
    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()>;

    /// Called once when the task finishes.
    fn finish_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
    }

    /// Called once when the task aborts.
    fn abort_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
    }
}

/// Scheduling status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Created but never run.
    Constructed,
    /// In the runnable queue of its engine.
    Queued,
    /// Being stepped.
    Running,
    /// Blocked on a condition mask.
    Waiting,
    /// Finished successfully.
    Finished,
    /// Aborted.
    Aborted,
}

impl RunStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Aborted)
    }
}

/// What a child run does to its parent when the child aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnAbort {
    /// Abort the parent too.
    #[default]
    AbortParent,
    /// Signal the parent as if the child finished.
    SignalParent,
    /// Leave the parent alone.
    DoNothing,
}

enum Completion {
    Detached,
    Parent {
        parent: Weak<Task>,
        condition: Condition,
        on_abort: OnAbort,
    },
    Callback(Box<dyn FnOnce(bool) + Send>),
}

struct Sched {
    status: RunStatus,
    wait_mask: Condition,
    pending: Condition,
    abort_requested: bool,
    engine: Weak<Engine>,
}

struct Core {
    machine: Box<dyn StateMachine>,
    state: StateType,
}

/// The transition recorded by one call of `multiplex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Wait(Condition),
    Yield,
    Finish,
    Abort,
}

/// Result of stepping a task once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// Wants to run again on the next pass.
    Yielded,
    /// Runnable right away (a wait that was already satisfied).
    Runnable,
    /// Blocked on conditions.
    Waiting,
    Finished,
    Aborted,
}

/// A cooperative, stateful unit of work.
pub struct Task {
    id: TaskId,
    name: &'static str,
    state: AtomicU32,
    core: Mutex<Core>,
    sched: Mutex<Sched>,
    completion: Mutex<Completion>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("status", &self.status())
            .finish()
    }
}

impl Task {
    /// Create a task around a state machine.
    pub fn create(machine: impl StateMachine) -> Arc<Task> {
        Self::create_boxed(Box::new(machine))
    }

    pub fn create_boxed(machine: Box<dyn StateMachine>) -> Arc<Task> {
        let name = machine.task_name();
        let state = machine.initial_state();
        Arc::new(Task {
            id: TaskId::next(),
            name,
            state: AtomicU32::new(state),
            core: Mutex::new(Core { machine, state }),
            sched: Mutex::new(Sched {
                status: RunStatus::Constructed,
                wait_mask: 0,
                pending: 0,
                abort_requested: false,
                engine: Weak::new(),
            }),
            completion: Mutex::new(Completion::Detached),
        })
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The run state as of the end of the last step.
    #[inline]
    pub fn state(&self) -> StateType {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn status(&self) -> RunStatus {
        self.sched.lock().status
    }

    /// Conditions the task is still blocked on.
    #[inline]
    pub fn wait_mask(&self) -> Condition {
        self.sched.lock().wait_mask
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status() == RunStatus::Finished
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.status() == RunStatus::Aborted
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Start running the task on `engine`.
    pub fn run(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
    ) -> Result<(), SchedulerError> {
        self.start(engine, Completion::Detached)
    }

    /// Start running the task as a child of `parent`.
    ///
    /// When the child finishes the parent receives `signal(condition)`; when it
    /// aborts, `on_abort` decides.
    pub fn run_child(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
        parent: &Arc<Task>,
        condition: Condition,
        on_abort: OnAbort,
    ) -> Result<(), SchedulerError> {
        self.start(
            engine,
            Completion::Parent {
                parent: Arc::downgrade(parent),
                condition,
                on_abort,
            },
        )
    }

    /// Start running the task; `callback(success)` is called once it ends.
    pub fn run_with_callback<F>(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
        callback: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.start(engine, Completion::Callback(Box::new(callback)))
    }

    fn start(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
        completion: Completion,
    ) -> Result<(), SchedulerError> {
        {
            let mut sched = self.sched.lock();
            if sched.status != RunStatus::Constructed {
                return Err(SchedulerError::AlreadyRunning(self.id));
            }
            engine.admit(self)?;
            *self.completion.lock() = completion;
            sched.engine = Arc::downgrade(engine);
            sched.status = RunStatus::Queued;
        }
        debug!(task = %self.id, name = self.name, engine = engine.name(), "run");
        engine.push(self.clone());
        Ok(())
    }

    /// Clear `mask` from the conditions this task waits on.
    ///
    /// Bits the task is not waiting on right now are remembered and satisfy
    /// the next `wait` that includes them.
    pub fn signal(
        self: &Arc<Self>,
        mask: Condition,
    ) {
        if mask == 0 {
            return;
        }
        let wake = {
            let mut sched = self.sched.lock();
            match sched.status {
                RunStatus::Finished | RunStatus::Aborted => {
                    debug!(task = %self.id, name = self.name, mask, "signal to terminated task ignored");
                    return;
                }
                RunStatus::Waiting => {
                    sched.pending |= mask & !sched.wait_mask;
                    sched.wait_mask &= !mask;
                    if sched.wait_mask == 0 {
                        sched.status = RunStatus::Queued;
                        Some(sched.engine.clone())
                    } else {
                        None
                    }
                }
                RunStatus::Constructed | RunStatus::Queued | RunStatus::Running => {
                    sched.pending |= mask;
                    None
                }
            }
        };
        trace!(task = %self.id, mask, "signal");
        if let Some(engine) = wake {
            self.wake(&engine);
        }
    }

    /// Request an abort. The task is aborted on its next step.
    pub fn abort(self: &Arc<Self>) {
        let wake = {
            let mut sched = self.sched.lock();
            if sched.status.is_terminal() || sched.abort_requested {
                return;
            }
            sched.abort_requested = true;
            if sched.status == RunStatus::Waiting {
                sched.status = RunStatus::Queued;
                sched.wait_mask = 0;
                Some(sched.engine.clone())
            } else {
                None
            }
        };
        debug!(task = %self.id, name = self.name, "abort requested");
        if let Some(engine) = wake {
            self.wake(&engine);
        }
    }

    fn wake(
        self: &Arc<Self>,
        engine: &Weak<Engine>,
    ) {
        match engine.upgrade() {
            Some(engine) => engine.push(self.clone()),
            None => warn!(task = %self.id, name = self.name, "engine gone, task cannot be woken"),
        }
    }

    /// Step the task until it waits, yields or terminates.
    pub(crate) fn step(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
    ) -> StepOutcome {
        let abort_now = {
            let mut sched = self.sched.lock();
            debug_assert_eq!(sched.status, RunStatus::Queued, "{} stepped while not queued", self.id);
            sched.status = RunStatus::Running;
            sched.abort_requested
        };

        let mut core = self.core.lock();

        let transition = if abort_now {
            Transition::Abort
        } else {
            self.run_states(engine, &mut core)
        };
        self.state.store(core.state, Ordering::Release);

        match transition {
            Transition::Yield => {
                self.sched.lock().status = RunStatus::Queued;
                StepOutcome::Yielded
            }
            Transition::Wait(mask) => {
                let mut sched = self.sched.lock();
                sched.status = RunStatus::Queued;
                if sched.abort_requested {
                    return StepOutcome::Runnable;
                }
                let effective = mask & !sched.pending;
                sched.pending &= !mask;
                if effective == 0 {
                    StepOutcome::Runnable
                } else {
                    sched.wait_mask = effective;
                    sched.status = RunStatus::Waiting;
                    StepOutcome::Waiting
                }
            }
            Transition::Finish | Transition::Abort => {
                let success = transition == Transition::Finish;
                {
                    let mut sched = self.sched.lock();
                    sched.status = if success { RunStatus::Finished } else { RunStatus::Aborted };
                    sched.wait_mask = 0;
                    sched.pending = 0;
                }
                if success {
                    debug!(task = %self.id, name = self.name, "finished");
                    core.machine.finish_impl(self);
                } else {
                    debug!(task = %self.id, name = self.name, state = core.machine.state_name(core.state), "aborted");
                    core.machine.abort_impl(self);
                }
                drop(core);
                self.complete(success);
                engine.retire(self.id);
                if success {
                    StepOutcome::Finished
                } else {
                    StepOutcome::Aborted
                }
            }
        }
    }

    fn run_states(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
        core: &mut Core,
    ) -> Transition {
        loop {
            let state = core.state;
            let mut ctx = TaskContext {
                task: self,
                engine,
                state,
                transition: None,
            };
            trace!(task = %self.id, name = self.name, state = core.machine.state_name(state), "multiplex");
            let result = core.machine.multiplex(state, &mut ctx);
            let TaskContext {
                state: next,
                transition,
                ..
            } = ctx;
            if next != state {
                debug!(
                    task = %self.id,
                    name = self.name,
                    "{} -> {}",
                    core.machine.state_name(state),
                    core.machine.state_name(next)
                );
            }
            core.state = next;

            if let Err(err) = result {
                error!(task = %self.id, name = self.name, state = core.machine.state_name(state), "{:#}", err);
                return Transition::Abort;
            }
            match transition {
                Some(transition) => return transition,
                None if self.sched.lock().abort_requested => return Transition::Abort,
                None => continue,
            }
        }
    }

    fn complete(
        self: &Arc<Self>,
        success: bool,
    ) {
        let completion = std::mem::replace(&mut *self.completion.lock(), Completion::Detached);
        match completion {
            Completion::Detached => {}
            Completion::Callback(callback) => callback(success),
            Completion::Parent {
                parent,
                condition,
                on_abort,
            } => {
                let Some(parent) = parent.upgrade() else {
                    return;
                };
                if success {
                    parent.signal(condition);
                    return;
                }
                match on_abort {
                    OnAbort::AbortParent => parent.abort(),
                    OnAbort::SignalParent => parent.signal(condition),
                    OnAbort::DoNothing => {}
                }
            }
        }
    }
}

/// The view a state machine has of its own task while it is being stepped.
pub struct TaskContext<'a> {
    task: &'a Arc<Task>,
    engine: &'a Arc<Engine>,
    state: StateType,
    transition: Option<Transition>,
}

impl<'a> TaskContext<'a> {
    /// The task being stepped.
    #[inline]
    pub fn task(&self) -> &'a Arc<Task> {
        self.task
    }

    /// The engine the task runs on.
    #[inline]
    pub fn engine(&self) -> &'a Arc<Engine> {
        self.engine
    }

    #[inline]
    pub fn state(&self) -> StateType {
        self.state
    }

    /// Continue in `state`, after the recorded transition (if any).
    pub fn set_state(
        &mut self,
        state: StateType,
    ) {
        if let Some(t @ (Transition::Finish | Transition::Abort)) = self.transition {
            panic!("{} ({}): set_state after {:?}", self.task.id, self.task.name, t);
        }
        self.state = state;
    }

    /// Suspend until every bit in `condition` was signalled.
    pub fn wait(
        &mut self,
        condition: Condition,
    ) {
        self.record(Transition::Wait(condition));
    }

    /// Run again on the next pass of the engine.
    pub fn yield_now(&mut self) {
        self.record(Transition::Yield);
    }

    pub fn finish(&mut self) {
        self.record(Transition::Finish);
    }

    pub fn abort(&mut self) {
        self.record(Transition::Abort);
    }

    fn record(
        &mut self,
        transition: Transition,
    ) {
        if let Some(previous) = self.transition {
            panic!(
                "{} ({}): {:?} after {:?} in the same step",
                self.task.id, self.task.name, transition, previous
            );
        }
        self.transition = Some(transition);
    }
}
