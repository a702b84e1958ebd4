//! TaskDeque 单元测试

use std::sync::Arc;

use parking_lot::Mutex;
use quickcheck::quickcheck;

use crate::runtime::deque::{DatumHandler, DequeConsumer, TaskDeque};
use crate::runtime::scheduler::{Engine, RunStatus, StateMachine, StateType, Task, TaskContext};

#[derive(Default)]
struct Seen {
    handled: Vec<u32>,
    discarded: Vec<u32>,
    finished: usize,
    aborted: usize,
}

struct Recorder(Arc<Mutex<Seen>>);

impl DatumHandler<u32> for Recorder {
    fn handle(
        &mut self,
        datum: u32,
    ) {
        self.0.lock().handled.push(datum);
    }

    fn producer_finished(&mut self) {
        self.0.lock().finished += 1;
    }

    fn discard(
        &mut self,
        datum: u32,
    ) {
        self.0.lock().discarded.push(datum);
    }

    fn consumer_aborted(&mut self) {
        self.0.lock().aborted += 1;
    }
}

/// Produces `0..count`, one datum per step.
struct Producer {
    deque: Arc<TaskDeque<u32>>,
    next: u32,
    count: u32,
}

impl StateMachine for Producer {
    fn task_name(&self) -> &'static str {
        "Producer"
    }

    fn state_name(
        &self,
        _state: StateType,
    ) -> &'static str {
        "Producer_produce"
    }

    fn initial_state(&self) -> StateType {
        0
    }

    fn multiplex(
        &mut self,
        _state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        if self.next == self.count {
            ctx.finish();
            return Ok(());
        }
        self.deque.have_new_datum(self.next);
        self.next += 1;
        ctx.yield_now();
        Ok(())
    }

    fn finish_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
        self.deque.set_producer_finished();
    }
}

fn consumer(deque: &Arc<TaskDeque<u32>>) -> (Arc<Task>, Arc<Mutex<Seen>>) {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let task = DequeConsumer::spawn(deque, Recorder(seen.clone()));
    (task, seen)
}

quickcheck! {
    fn prop_flush_is_fifo(data: Vec<u32>) -> bool {
        let deque = TaskDeque::new();
        for &datum in &data {
            deque.have_new_datum(datum);
        }
        let mut out = Vec::new();
        let count = deque.flush_new_data(|datum| out.push(datum));
        count == data.len() && out == data && deque.is_empty()
    }
}

#[test]
fn test_consumer_gets_everything_in_order() {
    let deque = Arc::new(TaskDeque::new());
    let (task, seen) = consumer(&deque);
    let engine = Engine::new("deque");
    task.run(&engine).unwrap();
    Task::create(Producer {
        deque: deque.clone(),
        next: 0,
        count: 10,
    })
    .run(&engine)
    .unwrap();

    while engine.has_runnable() {
        engine.step_all(None);
    }

    let seen = seen.lock();
    assert_eq!(seen.handled, (0..10).collect::<Vec<_>>());
    assert_eq!(seen.finished, 1);
    assert!(task.is_finished());
}

#[test]
fn test_consumer_drains_before_finishing() {
    let deque = Arc::new(TaskDeque::new());
    let (task, seen) = consumer(&deque);
    deque.have_new_datum(1);
    deque.have_new_datum(2);
    deque.set_producer_finished();

    let engine = Engine::new("deque");
    task.run(&engine).unwrap();
    engine.step_all(None);

    assert_eq!(seen.lock().handled, vec![1, 2]);
    assert_eq!(seen.lock().finished, 1);
    assert!(task.is_finished());
}

#[test]
fn test_consumer_waits_while_producer_runs() {
    let deque = Arc::new(TaskDeque::new());
    let (task, seen) = consumer(&deque);
    let engine = Engine::new("deque");
    task.run(&engine).unwrap();
    engine.step_all(None);
    assert_eq!(task.status(), RunStatus::Waiting);

    deque.have_new_datum(7);
    engine.step_all(None);
    assert_eq!(seen.lock().handled, vec![7]);
    assert_eq!(task.status(), RunStatus::Waiting);
    assert_eq!(seen.lock().finished, 0);
}

#[test]
fn test_aborted_consumer_discards_queued_data() {
    let deque = Arc::new(TaskDeque::new());
    let (task, seen) = consumer(&deque);
    let engine = Engine::new("deque");
    task.run(&engine).unwrap();
    engine.step_all(None);

    task.abort();
    deque.have_new_datum(3);
    deque.have_new_datum(4);
    engine.step_all(None);

    assert!(task.is_aborted());
    let seen = seen.lock();
    assert!(seen.handled.is_empty());
    assert_eq!(seen.discarded, vec![3, 4]);
    assert_eq!(seen.finished, 0);
    assert_eq!(seen.aborted, 1);
    assert!(deque.is_empty());
}

#[test]
fn test_second_consumer_is_not_attached() {
    let deque = Arc::new(TaskDeque::<u32>::new());
    let (first, _) = consumer(&deque);
    let (_second, _) = consumer(&deque);
    assert_eq!(deque.consumer().map(|task| task.id()), Some(first.id()));
}

#[test]
fn test_pop_front_and_len() {
    let deque = TaskDeque::new();
    assert!(deque.pop_front().is_none());
    deque.have_new_datum("a");
    deque.have_new_datum("b");
    assert_eq!(deque.len(), 2);
    assert_eq!(deque.pop_front(), Some("a"));
    assert_eq!(deque.len(), 1);
    assert!(!deque.is_producer_finished());
}
