//! TaskMutex 单元测试

use std::sync::Arc;

use parking_lot::Mutex;

use super::{fn_task, new_log, waiting_task, Log};
use crate::runtime::scheduler::{Engine, RunStatus, Task, TaskMutex};

const GOT_LOCK: u32 = 0x10;

/// Takes the lock, holds it for one yield, then releases it.
fn locker(
    name: &'static str,
    log: &Log,
    mutex: &Arc<TaskMutex>,
    order: &Arc<Mutex<Vec<&'static str>>>,
) -> Arc<Task> {
    let mutex = mutex.clone();
    let order = order.clone();
    fn_task(name, log, move |state, ctx| {
        match state {
            0 => {
                ctx.set_state(1);
                if !mutex.lock(ctx.task(), GOT_LOCK) {
                    ctx.wait(GOT_LOCK);
                }
            }
            1 => {
                assert!(mutex.is_self_locked(ctx.task()));
                order.lock().push(name);
                ctx.set_state(2);
                ctx.yield_now();
            }
            _ => {
                mutex.unlock(ctx.task());
                ctx.finish();
            }
        }
        Ok(())
    })
}

#[test]
fn test_one_holder_and_fifo_hand_over() {
    let log = new_log();
    let mutex = Arc::new(TaskMutex::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::new("mutex");

    let tasks: Vec<_> = ["a", "b", "c"].iter().map(|&name| locker(name, &log, &mutex, &order)).collect();
    for task in &tasks {
        task.run(&engine).unwrap();
    }

    engine.step_all(None);
    assert!(mutex.is_locked());
    assert_eq!(mutex.waiters(), 2);
    assert_eq!(*order.lock(), vec!["a"]);

    while engine.has_runnable() {
        engine.step_all(None);
    }
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    assert!(tasks.iter().all(|task| task.is_finished()));
    assert!(!mutex.is_locked());
    assert_eq!(mutex.waiters(), 0);
}

#[test]
fn test_lock_again_by_holder_succeeds() {
    let log = new_log();
    let mutex = TaskMutex::new();
    let task = waiting_task("holder", &log, 0x1);

    assert!(mutex.lock(&task, GOT_LOCK));
    assert!(mutex.lock(&task, GOT_LOCK));
    assert_eq!(mutex.waiters(), 0);
    mutex.unlock(&task);
    assert!(!mutex.is_locked());
}

#[test]
fn test_waiter_is_queued_once() {
    let log = new_log();
    let mutex = TaskMutex::new();
    let holder = waiting_task("holder", &log, 0x1);
    let other = waiting_task("other", &log, 0x1);

    assert!(mutex.lock(&holder, GOT_LOCK));
    assert!(!mutex.lock(&other, GOT_LOCK));
    assert!(!mutex.lock(&other, GOT_LOCK));
    assert_eq!(mutex.waiters(), 1);
}

#[test]
fn test_unlock_skips_terminated_waiters() {
    let log = new_log();
    let mutex = Arc::new(TaskMutex::new());
    let engine = Engine::new("mutex");
    let holder = waiting_task("holder", &log, 0x1);
    assert!(mutex.lock(&holder, GOT_LOCK));

    let waiter = waiting_task("waiter", &log, GOT_LOCK);
    waiter.run(&engine).unwrap();
    assert!(!mutex.lock(&waiter, GOT_LOCK));
    engine.step_all(None);
    waiter.abort();
    engine.step_all(None);
    assert!(waiter.is_aborted());

    mutex.unlock(&holder);
    assert!(!mutex.is_locked());
    assert_eq!(mutex.waiters(), 0);
}

#[test]
fn test_abandon_hands_lock_on() {
    let log = new_log();
    let mutex = TaskMutex::new();
    let engine = Engine::new("mutex");
    let holder = waiting_task("holder", &log, 0x1);
    let quitter = waiting_task("quitter", &log, GOT_LOCK);
    let next = waiting_task("next", &log, GOT_LOCK);
    quitter.run(&engine).unwrap();
    next.run(&engine).unwrap();
    engine.step_all(None);

    assert!(mutex.lock(&holder, GOT_LOCK));
    assert!(!mutex.lock(&quitter, GOT_LOCK));
    assert!(!mutex.lock(&next, GOT_LOCK));

    mutex.abandon(&quitter);
    assert_eq!(mutex.waiters(), 1);
    mutex.abandon(&holder);

    assert!(mutex.is_self_locked(&next));
    assert_eq!(next.status(), RunStatus::Queued);
    assert_eq!(quitter.status(), RunStatus::Waiting);
}
