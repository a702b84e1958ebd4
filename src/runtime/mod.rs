//! Runtime system
//!
//! This module contains the cooperative task scheduler, the producer/consumer
//! deque, and [`Runtime`], which owns the engines every other component runs
//! its tasks on.

pub mod deque;
pub mod scheduler;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::util::config::SchedulerConfig;
use scheduler::{spawn_workers, Engine, Priority, SchedulerError, Worker};

/// The engines of one process and their worker threads.
///
/// The synchronous engine is never given workers; it is stepped by whoever
/// owns the main loop. The priority engines get the number of workers the
/// configuration asks for, and are stepped by hand when that number is 0.
#[derive(Debug)]
pub struct Runtime {
    synchronous: Arc<Engine>,
    engines: [Arc<Engine>; 3],
    worker_counts: [usize; 3],
    workers: Mutex<Vec<Worker>>,
}

impl Runtime {
    /// Build the engines and spawn the configured workers.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let engine_config = config.engine_config();
        let synchronous = Engine::with_config("synchronous", engine_config.clone());
        let engines = Priority::ALL.map(|priority| Engine::with_config(priority.as_str(), engine_config.clone()));
        let worker_counts = Priority::ALL.map(|priority| config.workers(priority));

        let runtime = Self {
            synchronous,
            engines,
            worker_counts,
            workers: Mutex::new(Vec::new()),
        };

        for priority in Priority::ALL {
            let count = runtime.worker_counts[priority as usize];
            if count == 0 {
                continue;
            }
            let spawned = spawn_workers(runtime.engine(priority), count)?;
            runtime.workers.lock().extend(spawned);
        }

        info!(
            low = worker_counts[Priority::Low as usize],
            normal = worker_counts[Priority::Normal as usize],
            high = worker_counts[Priority::High as usize],
            "runtime started"
        );
        Ok(runtime)
    }

    /// A runtime without worker threads; drive it with [`Runtime::run_until_idle`].
    pub fn manual() -> Self {
        Self {
            synchronous: Engine::new("synchronous"),
            engines: Priority::ALL.map(|priority| Engine::new(priority.as_str())),
            worker_counts: [0; 3],
            workers: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn synchronous_engine(&self) -> &Arc<Engine> {
        &self.synchronous
    }

    #[inline]
    pub fn engine(
        &self,
        priority: Priority,
    ) -> &Arc<Engine> {
        &self.engines[priority as usize]
    }

    /// The synchronous engine followed by the priority engines, high first.
    pub fn engines(&self) -> impl Iterator<Item = &Arc<Engine>> {
        std::iter::once(&self.synchronous).chain(self.engines.iter().rev())
    }

    fn is_manual(
        &self,
        engine: &Arc<Engine>,
    ) -> bool {
        if Arc::ptr_eq(engine, &self.synchronous) {
            return true;
        }
        Priority::ALL
            .iter()
            .any(|&p| Arc::ptr_eq(engine, &self.engines[p as usize]) && self.worker_counts[p as usize] == 0)
    }

    /// Step every engine without workers until no engine has work left.
    ///
    /// Engines with workers are waited for. Returns the number of steps taken
    /// on the calling thread.
    pub fn run_until_idle(&self) -> usize {
        self.run_until_idle_for(None).0
    }

    /// Like [`Runtime::run_until_idle`] but gives up after `timeout`.
    ///
    /// Returns the number of steps taken here and whether idle was reached.
    pub fn run_until_idle_for(
        &self,
        timeout: Option<Duration>,
    ) -> (usize, bool) {
        let start = Instant::now();
        let mut total = 0;
        loop {
            let mut steps = 0;
            for engine in self.engines() {
                if self.is_manual(engine) {
                    steps += engine.step_all(None);
                }
            }
            total += steps;
            if steps == 0 && self.all_idle() {
                return (total, true);
            }
            if timeout.is_some_and(|timeout| start.elapsed() >= timeout) {
                return (total, false);
            }
            if steps == 0 {
                thread::sleep(Duration::from_micros(200));
            }
        }
    }

    /// Every engine idle, with no step completing while checking.
    fn all_idle(&self) -> bool {
        let before: usize = self.engines().map(|e| e.steps_taken()).sum();
        if !self.engines().all(|e| e.is_idle()) {
            return false;
        }
        let after: usize = self.engines().map(|e| e.steps_taken()).sum();
        before == after
    }

    /// Abort every task still active, stop the engines and join the workers.
    pub fn shutdown(&self) {
        for engine in self.engines() {
            engine.abort_all();
        }
        // Let the aborts run before the workers go away.
        let (_, idle) = self.run_until_idle_for(Some(Duration::from_secs(1)));
        if !idle {
            warn!("runtime did not become idle before shutdown");
        }

        for engine in self.engines() {
            engine.stop();
        }
        let workers: Vec<Worker> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let name = worker.name().to_string();
            if worker.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
            }
        }
        debug!("runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.workers.lock().is_empty() {
            self.shutdown();
        }
    }
}
