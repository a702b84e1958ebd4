//! Scheduler 单元测试
//!
//! 测试任务状态机、引擎、任务互斥锁和状态表

mod mutex;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::scheduler::{StateMachine, StateType, Task, TaskContext};

/// Shared log of what test tasks did.
pub(super) type Log = Arc<Mutex<Vec<String>>>;

pub(super) fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub(super) fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// A task whose states are a closure; records `finish` / `abort` hooks.
pub(super) struct FnMachine<F> {
    name: &'static str,
    f: F,
    log: Log,
}

impl<F> StateMachine for FnMachine<F>
where
    F: FnMut(StateType, &mut TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
{
    fn task_name(&self) -> &'static str {
        self.name
    }

    fn state_name(
        &self,
        _state: StateType,
    ) -> &'static str {
        "FnMachine_state"
    }

    fn initial_state(&self) -> StateType {
        0
    }

    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        (self.f)(state, ctx)
    }

    fn finish_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
        self.log.lock().push(format!("{}:finish", self.name));
    }

    fn abort_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
        self.log.lock().push(format!("{}:abort", self.name));
    }
}

pub(super) fn fn_task<F>(
    name: &'static str,
    log: &Log,
    f: F,
) -> Arc<Task>
where
    F: FnMut(StateType, &mut TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
{
    Task::create(FnMachine {
        name,
        f,
        log: log.clone(),
    })
}

/// Finishes on its first step.
pub(super) fn finishing_task(
    name: &'static str,
    log: &Log,
) -> Arc<Task> {
    fn_task(name, log, |_, ctx| {
        ctx.finish();
        Ok(())
    })
}

/// Waits for `mask` in state 0, finishes in state 1.
pub(super) fn waiting_task(
    name: &'static str,
    log: &Log,
    mask: u32,
) -> Arc<Task> {
    fn_task(name, log, move |state, ctx| {
        match state {
            0 => {
                ctx.set_state(1);
                ctx.wait(mask);
            }
            _ => ctx.finish(),
        }
        Ok(())
    })
}
