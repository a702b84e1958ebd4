//! A mutex for tasks.
//!
//! Locking never blocks a thread. A task that does not get the lock is queued
//! and receives `signal(condition)` once the lock was handed to it; it then
//! calls `wait(condition)` and, when resumed, owns the lock.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::state::Condition;
use super::task::{Task, TaskId};

#[derive(Debug, Default)]
struct Inner {
    holder: Option<TaskId>,
    waiters: VecDeque<(Arc<Task>, Condition)>,
}

/// Mutual exclusion between tasks, with FIFO hand-over.
#[derive(Debug, Default)]
pub struct TaskMutex {
    inner: Mutex<Inner>,
}

impl TaskMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `task`.
    ///
    /// Returns `true` if `task` holds the lock now (also when it was handed the
    /// lock earlier). Otherwise `task` is queued and will receive
    /// `signal(condition)` when the lock is handed to it.
    pub fn lock(
        &self,
        task: &Arc<Task>,
        condition: Condition,
    ) -> bool {
        let mut inner = self.inner.lock();
        match inner.holder {
            None => {
                inner.holder = Some(task.id());
                true
            }
            Some(holder) if holder == task.id() => true,
            Some(holder) => {
                if !inner.waiters.iter().any(|(t, _)| t.id() == task.id()) {
                    trace!(task = %task.id(), holder = %holder, "queued on task mutex");
                    inner.waiters.push_back((task.clone(), condition));
                }
                false
            }
        }
    }

    /// Release the lock held by `task` and hand it to the next waiter.
    ///
    /// # Panics
    ///
    /// In debug builds, if `task` does not hold the lock.
    pub fn unlock(
        &self,
        task: &Task,
    ) {
        let next = {
            let mut inner = self.inner.lock();
            debug_assert_eq!(
                inner.holder,
                Some(task.id()),
                "{} unlocked a task mutex it does not hold",
                task.id()
            );
            loop {
                match inner.waiters.pop_front() {
                    Some((next, _)) if next.is_terminal() => {
                        trace!(task = %next.id(), "terminated waiter skipped");
                    }
                    Some((next, condition)) => {
                        inner.holder = Some(next.id());
                        break Some((next, condition));
                    }
                    None => {
                        inner.holder = None;
                        break None;
                    }
                }
            }
        };
        if let Some((next, condition)) = next {
            trace!(from = %task.id(), to = %next.id(), "task mutex handed over");
            next.signal(condition);
        }
    }

    /// Take `task` off the lock: release it when held, leave the queue
    /// otherwise. Used by tasks that abort while holding or waiting.
    pub fn abandon(
        &self,
        task: &Task,
    ) {
        let held = {
            let mut inner = self.inner.lock();
            inner.waiters.retain(|(t, _)| t.id() != task.id());
            inner.holder == Some(task.id())
        };
        if held {
            self.unlock(task);
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.lock().holder.is_some()
    }

    #[inline]
    pub fn is_self_locked(
        &self,
        task: &Task,
    ) -> bool {
        self.inner.lock().holder == Some(task.id())
    }

    #[inline]
    pub fn waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}
