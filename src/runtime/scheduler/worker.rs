//! Worker threads that drive an engine.

use std::sync::Arc;
use std::thread;

use tracing::{debug, trace};

use super::queue::Engine;
use super::SchedulerError;

/// A thread stepping one engine until the engine is stopped.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the thread to exit. The engine must be stopped first.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Spawn `count` workers for `engine`.
pub fn spawn_workers(
    engine: &Arc<Engine>,
    count: usize,
) -> Result<Vec<Worker>, SchedulerError> {
    let mut workers = Vec::with_capacity(count);

    for worker_id in 0..count {
        let engine = engine.clone();
        let name = format!("{}-worker-{}", engine.name(), worker_id);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(worker_id, &engine))
            .map_err(SchedulerError::Spawn)?;
        workers.push(Worker {
            name,
            handle: Some(handle),
        });
    }

    Ok(workers)
}

/// Worker thread main loop.
fn worker_loop(
    worker_id: usize,
    engine: &Arc<Engine>,
) {
    debug!(engine = engine.name(), worker_id, "worker started");
    let idle_timeout = engine.config().idle_timeout;

    while !engine.is_stopped() {
        if engine.step() == 0 {
            trace!(engine = engine.name(), worker_id, "idle");
            engine.park(idle_timeout);
        }
    }

    debug!(engine = engine.name(), worker_id, "worker stopped");
}
