//! The pipeline context: the runtime, the backend and every factory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::backend::{HeadlessBackend, HeadlessCompiler, Pipeline, PipelineBackend, ShaderCompiler};
use super::factory::{self, PipelineFactory};
use super::key::FactoryIndex;
use super::sink::{MoveNewPipelines, PipelineStore};
use crate::runtime::deque::{DequeConsumer, TaskDeque};
use crate::runtime::scheduler::{Priority, SchedulerError, Task};
use crate::runtime::Runtime;

/// Owns what all pipeline factories of a process share.
pub struct PipelineContext {
    runtime: Arc<Runtime>,
    backend: Arc<dyn PipelineBackend>,
    compiler: Arc<dyn ShaderCompiler>,
    cache_dir: Option<PathBuf>,
    store: Arc<PipelineStore>,
    factories: Mutex<IndexMap<FactoryIndex, Weak<Task>>>,
    next_factory: AtomicU32,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("cache_dir", &self.cache_dir)
            .field("factories", &self.factories.lock().len())
            .field("pipelines", &self.store.len())
            .finish()
    }
}

impl PipelineContext {
    /// `cache_dir` of `None` keeps pipeline caches in memory.
    pub fn new(
        runtime: Arc<Runtime>,
        backend: Arc<dyn PipelineBackend>,
        compiler: Arc<dyn ShaderCompiler>,
        cache_dir: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            backend,
            compiler,
            cache_dir,
            store: PipelineStore::new(),
            factories: Mutex::new(IndexMap::new()),
            next_factory: AtomicU32::new(0),
        })
    }

    /// A context on the headless backend and compiler.
    pub fn headless(
        runtime: Arc<Runtime>,
        cache_dir: Option<PathBuf>,
    ) -> Arc<Self> {
        Self::new(
            runtime,
            Arc::new(HeadlessBackend::new()),
            Arc::new(HeadlessCompiler::new()),
            cache_dir,
        )
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn PipelineBackend> {
        &self.backend
    }

    #[inline]
    pub fn compiler(&self) -> &Arc<dyn ShaderCompiler> {
        &self.compiler
    }

    #[inline]
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    #[inline]
    pub fn store(&self) -> &Arc<PipelineStore> {
        &self.store
    }

    /// Create a factory and start its task, which then waits for
    /// [`PipelineFactory::generate`].
    ///
    /// The factory runs on the normal engine, its cache task on the low one
    /// and the task that moves its pipelines into the store on the high one.
    pub fn create_pipeline_factory(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<PipelineFactory, SchedulerError> {
        let index = FactoryIndex(self.next_factory.fetch_add(1, Ordering::Relaxed));
        let deque = Arc::new(TaskDeque::<Pipeline>::new());
        let sink = DequeConsumer::spawn(&deque, MoveNewPipelines::new(self.store.clone(), index, name));
        let factory = factory::create(self, index, name, deque, sink.clone());

        sink.run(self.runtime.engine(Priority::High))?;
        if let Err(e) = factory.task().run(self.runtime.engine(Priority::Normal)) {
            sink.abort();
            return Err(e);
        }
        self.factories.lock().insert(index, Arc::downgrade(factory.task()));
        debug!(factory = name, index = %index, "pipeline factory created");
        Ok(factory)
    }

    pub(crate) fn forget_factory(
        &self,
        index: FactoryIndex,
    ) {
        self.factories.lock().shift_remove(&index);
    }

    /// Factories whose task has not ended.
    pub fn running_factories(&self) -> usize {
        // Task state is read without holding the map; aborting factories
        // remove themselves while their task is locked.
        let tasks: Vec<Weak<Task>> = self.factories.lock().values().cloned().collect();
        let running = tasks
            .iter()
            .filter(|task| task.upgrade().is_some_and(|task| !task.is_terminal()))
            .count();
        self.factories.lock().retain(|_, task| task.strong_count() > 0);
        running
    }

    /// Abort every factory that is still running.
    pub fn abort_all_factories(&self) {
        let tasks: Vec<Arc<Task>> = self.factories.lock().values().filter_map(Weak::upgrade).collect();
        if !tasks.is_empty() {
            info!(factories = tasks.len(), "aborting pipeline factories");
        }
        for task in tasks {
            task.abort();
        }
    }
}
