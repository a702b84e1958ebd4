//! Producer/consumer hand-off between two tasks.
//!
//! A [`TaskDeque`] connects exactly one producer to one consumer task. Every
//! `have_new_datum` wakes the consumer through [`NEED_ACTION`]. The consumer
//! drains with `flush_new_data` and then calls `producer_not_finished`, which
//! only trusts the finished flag once the queue is empty:
//!
//! ```text
//!   consumer step:  flush_new_data(f)  ──►  producer_not_finished(ctx)?
//!                                              yes: wait(NEED_ACTION)
//!                                              no:  finish
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::runtime::scheduler::{
    Condition, StateLayer, StateMachine, StateType, Task, TaskContext, TASK_STATE_END,
};

/// The condition the consumer waits on.
pub const NEED_ACTION: Condition = 1;

/// Thread-safe FIFO between a producer and a consumer task.
pub struct TaskDeque<D> {
    queue: Mutex<VecDeque<D>>,
    producer_finished: AtomicBool,
    consumer: OnceCell<Weak<Task>>,
}

impl<D> fmt::Debug for TaskDeque<D> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskDeque")
            .field("len", &self.len())
            .field("producer_finished", &self.is_producer_finished())
            .finish()
    }
}

impl<D> Default for TaskDeque<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> TaskDeque<D> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            producer_finished: AtomicBool::new(false),
            consumer: OnceCell::new(),
        }
    }

    /// Bind the consumer task. Returns `false` if one was bound already.
    pub fn attach_consumer(
        &self,
        consumer: &Arc<Task>,
    ) -> bool {
        self.consumer.set(Arc::downgrade(consumer)).is_ok()
    }

    /// The consumer task, while it is alive.
    pub fn consumer(&self) -> Option<Arc<Task>> {
        self.consumer.get().and_then(Weak::upgrade)
    }

    fn notify_consumer(&self) {
        match self.consumer() {
            Some(consumer) => consumer.signal(NEED_ACTION),
            None => debug!("deque has no live consumer to notify"),
        }
    }

    /// Append a datum and wake the consumer.
    pub fn have_new_datum(
        &self,
        datum: D,
    ) {
        self.queue.lock().push_back(datum);
        self.notify_consumer();
    }

    /// Pop every queued datum in FIFO order and pass it to `f`.
    ///
    /// The lock is released before each call of `f`. Returns the number of
    /// data handled.
    pub fn flush_new_data<F>(
        &self,
        mut f: F,
    ) -> usize
    where
        F: FnMut(D),
    {
        let mut count = 0;
        loop {
            let Some(datum) = self.queue.lock().pop_front() else {
                break;
            };
            f(datum);
            count += 1;
        }
        count
    }

    /// Mark the end of production and wake the consumer.
    ///
    /// # Panics
    ///
    /// In debug builds, when called twice.
    pub fn set_producer_finished(&self) {
        let was_finished = self.producer_finished.swap(true, Ordering::AcqRel);
        debug_assert!(!was_finished, "set_producer_finished called twice");
        if !was_finished {
            self.notify_consumer();
        }
    }

    #[inline]
    pub fn is_producer_finished(&self) -> bool {
        self.producer_finished.load(Ordering::Acquire)
    }

    /// Call after draining. Returns `false` when the producer finished and
    /// everything it produced was drained; otherwise waits on `NEED_ACTION`
    /// and returns `true`.
    pub fn producer_not_finished(
        &self,
        ctx: &mut TaskContext<'_>,
    ) -> bool {
        if self.is_producer_finished() && self.queue.lock().is_empty() {
            return false;
        }
        ctx.wait(NEED_ACTION);
        true
    }

    pub fn pop_front(&self) -> Option<D> {
        self.queue.lock().pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// What a [`DequeConsumer`] does with the data it drains.
pub trait DatumHandler<D>: Send + 'static {
    /// Take ownership of one datum.
    fn handle(
        &mut self,
        datum: D,
    );

    /// The producer finished and every datum was handled.
    fn producer_finished(&mut self) {}

    /// Called for every datum still queued when the consumer aborts.
    fn discard(
        &mut self,
        datum: D,
    );

    /// The consumer aborted; every queued datum was discarded already.
    fn consumer_aborted(&mut self) {}
}

/// Run states of [`DequeConsumer`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeConsumerState {
    Start = TASK_STATE_END,
    NeedAction,
}

impl StateLayer for DequeConsumerState {
    const LAYER: &'static str = "DequeConsumer";
    const BEGIN: StateType = TASK_STATE_END;
    const TABLE: &'static [(Self, &'static str)] = &[
        (DequeConsumerState::Start, "DequeConsumer_start"),
        (DequeConsumerState::NeedAction, "DequeConsumer_need_action"),
    ];

    #[inline]
    fn state(self) -> StateType {
        self as StateType
    }
}

/// A consumer task that moves data out of a [`TaskDeque`] into a handler.
pub struct DequeConsumer<D, H> {
    deque: Arc<TaskDeque<D>>,
    handler: H,
}

impl<D, H> DequeConsumer<D, H>
where
    D: Send + 'static,
    H: DatumHandler<D>,
{
    /// Create the consumer task and bind it to `deque`.
    pub fn spawn(
        deque: &Arc<TaskDeque<D>>,
        handler: H,
    ) -> Arc<Task> {
        let task = Task::create(Self {
            deque: deque.clone(),
            handler,
        });
        if !deque.attach_consumer(&task) {
            warn!(task = %task.id(), "deque already had a consumer");
        }
        task
    }
}

impl<D, H> StateMachine for DequeConsumer<D, H>
where
    D: Send + 'static,
    H: DatumHandler<D>,
{
    fn task_name(&self) -> &'static str {
        DequeConsumerState::LAYER
    }

    fn state_name(
        &self,
        state: StateType,
    ) -> &'static str {
        DequeConsumerState::name_of(state).unwrap_or("<unknown>")
    }

    fn initial_state(&self) -> StateType {
        DequeConsumerState::Start.state()
    }

    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        match DequeConsumerState::from_state(state) {
            Some(DequeConsumerState::Start) => {
                ctx.set_state(DequeConsumerState::NeedAction.state());
                ctx.wait(NEED_ACTION);
            }
            Some(DequeConsumerState::NeedAction) => {
                let handler = &mut self.handler;
                self.deque.flush_new_data(|datum| handler.handle(datum));
                if !self.deque.producer_not_finished(ctx) {
                    self.handler.producer_finished();
                    ctx.finish();
                }
            }
            None => panic!("DequeConsumer: unknown state {}", state),
        }
        Ok(())
    }

    fn abort_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
        let handler = &mut self.handler;
        let dropped = self.deque.flush_new_data(|datum| handler.discard(datum));
        if dropped > 0 {
            warn!(dropped, "consumer aborted with data still queued");
        }
        self.handler.consumer_aborted();
    }
}

#[cfg(test)]
mod tests;
