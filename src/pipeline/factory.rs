//! The pipeline factory task.
//!
//! A factory owns a set of characteristics, each run by its own axis task. It
//! enumerates every combination of fill indices with a [`MultiLoopCursor`] and,
//! for each combination, drives the axes through fill, preprocess and compile
//! before it creates the pipeline and hands it to its deque:
//!
//! ```text
//!   start ──(cache set up + fully initialized)──► initialize ──► initialized
//!     ──(characteristics initialized)──► top_multiloop ◄───────────────────┐
//!         │ done: finish                                                   │
//!         ▼                                                                │
//!   characteristics_filled ──► characteristics_preprocessed                │
//!     ──► characteristics_compiled ──► create_shared_resources ──► build_pipeline
//! ```
//!
//! Each broadcast arms a [`Rendezvous`] with the number of axes taking part;
//! the last axis to report wakes the factory. A phase nobody takes part in is
//! passed through without waiting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::{Pipeline, PipelineCreateInfo, ResourceHandle};
use super::cache::{cache_path, CacheBlob, PipelineCache, FACTORY_FINISHED};
use super::characteristic::{
    AxisShared, Characteristic, CharacteristicRangeTask, Needs, PhaseReports, Rendezvous, DO_COMPILE, DO_FILL,
    DO_PREPROCESS,
};
use super::context::PipelineContext;
use super::create_info::{CompiledShader, CreateInfoItem, FlatCreateInfo};
use super::error::PipelineError;
use super::key::{CharacteristicIndex, FactoryCharacteristicId, FactoryCharacteristicKey, FactoryIndex};
use super::multi_loop::{LoopTuple, MultiLoop, MultiLoopCursor};
use super::range::{IndexLayout, PipelineIndex};
use super::resource::{ResourceId, SharedResource};
use crate::runtime::deque::TaskDeque;
use crate::runtime::scheduler::{
    Condition, ConditionTable, Engine, OnAbort, Priority, SchedulerError, StateLayer, StateMachine, StateType, Task,
    TaskContext, TASK_STATE_END,
};

pub const PIPELINE_CACHE_SET_UP: Condition = 0x01;
pub const FULLY_INITIALIZED: Condition = 0x02;
pub const CHARACTERISTICS_INITIALIZED: Condition = 0x04;
pub const CHARACTERISTICS_FILLED: Condition = 0x08;
pub const CHARACTERISTICS_PREPROCESSED: Condition = 0x10;
pub const CHARACTERISTICS_COMPILED: Condition = 0x20;
pub const OBTAINED_CREATE_LOCK: Condition = 0x40;

pub const FACTORY_CONDITIONS: ConditionTable = ConditionTable::new(&[
    (PIPELINE_CACHE_SET_UP, "pipeline_cache_set_up"),
    (FULLY_INITIALIZED, "fully_initialized"),
    (CHARACTERISTICS_INITIALIZED, "characteristics_initialized"),
    (CHARACTERISTICS_FILLED, "characteristics_filled"),
    (CHARACTERISTICS_PREPROCESSED, "characteristics_preprocessed"),
    (CHARACTERISTICS_COMPILED, "characteristics_compiled"),
    (OBTAINED_CREATE_LOCK, "obtained_create_lock"),
]);

const AXIS_REPORTS: PhaseReports = PhaseReports {
    initialized: CHARACTERISTICS_INITIALIZED,
    filled: CHARACTERISTICS_FILLED,
    preprocessed: CHARACTERISTICS_PREPROCESSED,
    compiled: CHARACTERISTICS_COMPILED,
};

/// Run states of the factory task.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFactoryState {
    Start = TASK_STATE_END,
    Initialize,
    Initialized,
    CharacteristicsInitialized,
    TopMultiloop,
    CharacteristicsFilled,
    CharacteristicsPreprocessed,
    CharacteristicsCompiled,
    CreateSharedResources,
    BuildPipeline,
}

impl StateLayer for PipelineFactoryState {
    const LAYER: &'static str = "PipelineFactory";
    const BEGIN: StateType = TASK_STATE_END;
    const TABLE: &'static [(Self, &'static str)] = &[
        (PipelineFactoryState::Start, "PipelineFactory_start"),
        (PipelineFactoryState::Initialize, "PipelineFactory_initialize"),
        (PipelineFactoryState::Initialized, "PipelineFactory_initialized"),
        (PipelineFactoryState::CharacteristicsInitialized, "PipelineFactory_characteristics_initialized"),
        (PipelineFactoryState::TopMultiloop, "PipelineFactory_top_multiloop"),
        (PipelineFactoryState::CharacteristicsFilled, "PipelineFactory_characteristics_filled"),
        (PipelineFactoryState::CharacteristicsPreprocessed, "PipelineFactory_characteristics_preprocessed"),
        (PipelineFactoryState::CharacteristicsCompiled, "PipelineFactory_characteristics_compiled"),
        (PipelineFactoryState::CreateSharedResources, "PipelineFactory_create_shared_resources"),
        (PipelineFactoryState::BuildPipeline, "PipelineFactory_build_pipeline"),
    ];

    #[inline]
    fn state(self) -> StateType {
        self as StateType
    }
}

/// What the handle and the task share before generation starts.
#[derive(Default)]
struct FactoryShared {
    characteristics: Mutex<Vec<Box<dyn Characteristic>>>,
    generating: AtomicBool,
}

/// Handle to a pipeline factory.
///
/// Add characteristics, then call [`PipelineFactory::generate`].
pub struct PipelineFactory {
    index: FactoryIndex,
    name: String,
    task: Arc<Task>,
    sink: Arc<Task>,
    shared: Arc<FactoryShared>,
}

impl std::fmt::Debug for PipelineFactory {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PipelineFactory")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("task", &self.task)
            .finish()
    }
}

impl PipelineFactory {
    #[inline]
    pub fn index(&self) -> FactoryIndex {
        self.index
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The factory task.
    #[inline]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// The task that moves finished pipelines into the store.
    #[inline]
    pub fn sink(&self) -> &Arc<Task> {
        &self.sink
    }

    /// Add an axis. Axes are enumerated in the order they were added, the
    /// first one outermost.
    ///
    /// # Panics
    ///
    /// When called after [`PipelineFactory::generate`].
    pub fn add(
        &self,
        characteristic: impl Characteristic,
    ) {
        self.add_boxed(Box::new(characteristic));
    }

    pub fn add_boxed(
        &self,
        characteristic: Box<dyn Characteristic>,
    ) {
        assert!(
            !self.shared.generating.load(Ordering::Acquire),
            "{}: characteristic {} added after generate",
            self.name,
            characteristic.name()
        );
        self.shared.characteristics.lock().push(characteristic);
    }

    /// Start generating pipelines. Calling it again has no effect.
    pub fn generate(&self) {
        if self.shared.generating.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(factory = %self.name, "generate");
        self.task.signal(FULLY_INITIALIZED);
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.task.is_aborted()
    }

    /// Abort the factory and its axes.
    pub fn abort(&self) {
        self.task.abort();
    }
}

struct Axis {
    shared: Arc<AxisShared>,
    task: Arc<Task>,
}

/// The state machine of a factory task.
struct FactoryMachine {
    context: Arc<PipelineContext>,
    index: FactoryIndex,
    name: String,
    shared: Arc<FactoryShared>,
    deque: Arc<TaskDeque<Pipeline>>,
    sink: Arc<Task>,
    blob: CacheBlob,
    cache_task: Option<Arc<Task>>,
    rendezvous: Option<Arc<Rendezvous>>,
    axes: Vec<Axis>,
    unstarted: VecDeque<usize>,
    layout: IndexLayout,
    cursor: Option<MultiLoopCursor>,
    tuple: LoopTuple,
    pipeline_index: PipelineIndex,
    flat: Option<Arc<FlatCreateInfo>>,
    shaders: Vec<CompiledShader>,
    required: Vec<Arc<SharedResource>>,
    next_resource: usize,
    held: Vec<Arc<SharedResource>>,
    resources: Vec<(ResourceId, ResourceHandle)>,
    produced: usize,
    /// Since when, and at which ended-task count, admission keeps failing.
    stalled: Option<(Instant, usize)>,
}

impl FactoryMachine {
    fn rendezvous(&self) -> &Rendezvous {
        match &self.rendezvous {
            Some(rendezvous) => rendezvous,
            None => panic!("{}: axes used before initialization", self.name),
        }
    }

    /// Signal `condition` to every axis that needs `phase`, after telling
    /// the rendezvous how many reports to expect. Returns that number.
    fn broadcast(
        &self,
        phase: Needs,
        condition: Condition,
    ) -> usize {
        let participants: Vec<&Axis> = self.axes.iter().filter(|axis| axis.shared.needs().contains(phase)).collect();
        if participants.is_empty() {
            return 0;
        }
        self.rendezvous().arm(participants.len());
        for axis in &participants {
            axis.task.signal(condition);
        }
        participants.len()
    }

    /// Continue in `next`, waiting for `report` if anybody takes part.
    fn await_phase(
        ctx: &mut TaskContext<'_>,
        participants: usize,
        next: PipelineFactoryState,
        report: Condition,
    ) {
        ctx.set_state(next.state());
        if participants > 0 {
            ctx.wait(report);
        }
    }

    fn terminate_axes(&self) {
        for axis in &self.axes {
            axis.shared.terminate(&axis.task);
        }
    }

    fn release_create_locks(
        &mut self,
        task: &Task,
    ) {
        while let Some(resource) = self.held.pop() {
            resource.unlock_create(task);
        }
    }

    /// Give up every create lock this factory holds or waits for.
    fn abandon_create_locks(
        &mut self,
        task: &Task,
    ) {
        self.held.clear();
        for resource in self.required.iter().rev() {
            resource.abandon_create(task);
        }
    }

    /// Yield to retry a full engine, or give up once no task of `engine`
    /// ended for its admission timeout.
    fn retry_admission(
        &mut self,
        engine: &Engine,
        error: SchedulerError,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let ended = engine.ended_tasks();
        match self.stalled {
            Some((since, seen)) if seen == ended => {
                if since.elapsed() >= engine.config().admission_timeout {
                    warn!(factory = %self.name, "{}; giving up", error);
                    return Err(error.into());
                }
            }
            _ => self.stalled = Some((Instant::now(), ended)),
        }
        debug!(factory = %self.name, "{}; retrying", error);
        ctx.yield_now();
        Ok(())
    }

    fn signal_cache(&self) {
        if let Some(cache) = &self.cache_task {
            cache.signal(FACTORY_FINISHED);
        }
    }

    fn start(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let task = ctx.task();
        let cache = match &self.cache_task {
            Some(cache) => cache.clone(),
            None => {
                let path = self.context.cache_dir().map(|dir| cache_path(dir, &self.name));
                let cache = Task::create(PipelineCache::new(path, self.blob.clone(), task, PIPELINE_CACHE_SET_UP));
                self.cache_task = Some(cache.clone());
                cache
            }
        };
        let engine = self.context.runtime().engine(Priority::Low).clone();
        match cache.run(&engine) {
            Ok(()) => self.stalled = None,
            Err(e) if e.is_retryable() => return self.retry_admission(&engine, e, ctx),
            Err(e) => return Err(e.into()),
        }
        ctx.set_state(PipelineFactoryState::Initialize.state());
        ctx.wait(PIPELINE_CACHE_SET_UP | FULLY_INITIALIZED);
        Ok(())
    }

    fn initialize(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let characteristics = std::mem::take(&mut *self.shared.characteristics.lock());
        if characteristics.is_empty() {
            return Err(PipelineError::EmptyFactory(self.name.clone()).into());
        }
        // The factory itself is one of the active tasks of its engine.
        let engine = self.context.runtime().engine(Priority::Normal);
        let limit = engine.config().max_queue_size;
        if limit > 0 && characteristics.len() + 1 > limit {
            return Err(PipelineError::AdmissionLimit {
                factory: self.name.clone(),
                engine: engine.name().to_string(),
                needed: characteristics.len() + 1,
                limit,
            }
            .into());
        }
        let task = ctx.task();
        let rendezvous = Arc::new(Rendezvous::new(task));
        let compiler = self.context.compiler();

        let mut ranges = Vec::with_capacity(characteristics.len());
        for (k, characteristic) in characteristics.into_iter().enumerate() {
            let id = FactoryCharacteristicId {
                factory: self.index,
                characteristic: CharacteristicIndex(k as u32),
            };
            let shared = Arc::new(AxisShared::new(id, characteristic.as_ref()));
            ranges.push(shared.range());
            let machine =
                CharacteristicRangeTask::new(characteristic, shared.clone(), rendezvous.clone(), AXIS_REPORTS, compiler.clone());
            self.axes.push(Axis {
                shared,
                task: Task::create(machine),
            });
            self.unstarted.push_back(k);
        }
        self.layout = IndexLayout::from_ranges(&ranges);
        if !self.layout.fits() {
            return Err(PipelineError::IndexTooWide {
                factory: self.name.clone(),
                bits: self.layout.total_width(),
            }
            .into());
        }
        info!(
            factory = %self.name,
            axes = self.axes.len(),
            bits = self.layout.total_width(),
            "pipeline factory initialized"
        );

        rendezvous.arm(self.axes.len());
        self.rendezvous = Some(rendezvous);
        ctx.set_state(PipelineFactoryState::Initialized.state());
        Ok(())
    }

    fn spawn_axes(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let engine = self.context.runtime().engine(Priority::Normal).clone();
        // Axes start only once all of them fit.
        if self.axes.len() == self.unstarted.len() {
            match engine.check_room(self.unstarted.len()) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return self.retry_admission(&engine, e, ctx),
                Err(e) => return Err(e.into()),
            }
        }
        let task = ctx.task();
        while let Some(&k) = self.unstarted.front() {
            match self.axes[k].task.run_child(&engine, task, 0, OnAbort::AbortParent) {
                Ok(()) => {
                    self.unstarted.pop_front();
                    self.stalled = None;
                }
                Err(e) if e.is_retryable() => return self.retry_admission(&engine, e, ctx),
                Err(e) => return Err(e.into()),
            }
        }
        ctx.set_state(PipelineFactoryState::CharacteristicsInitialized.state());
        ctx.wait(CHARACTERISTICS_INITIALIZED);
        Ok(())
    }

    fn top_multiloop(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) {
        let Some(tuple) = self.cursor.as_mut().and_then(MultiLoopCursor::advance) else {
            ctx.finish();
            return;
        };
        for (axis, &value) in self.axes.iter().zip(tuple.iter()) {
            if axis.shared.needs().contains(Needs::FILL) {
                axis.shared.io().fill_index = Some(value);
            }
        }
        self.tuple = tuple;
        let participants = self.broadcast(Needs::FILL, DO_FILL);
        Self::await_phase(
            ctx,
            participants,
            PipelineFactoryState::CharacteristicsFilled,
            CHARACTERISTICS_FILLED,
        );
    }

    fn characteristics_filled(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) {
        self.pipeline_index = PipelineIndex(
            self.axes
                .iter()
                .zip(self.tuple.iter())
                .enumerate()
                .map(|(k, (axis, &value))| self.layout.place(k, axis.shared.range().contribution(value)))
                .fold(0, |index, bits| index | bits),
        );

        let flat = {
            let guards: Vec<_> = self.axes.iter().map(|axis| axis.shared.io()).collect();
            let lists: Vec<&[CreateInfoItem]> = guards
                .iter()
                .flat_map(|io| [io.initial_items.as_slice(), io.fill_items.as_slice()])
                .collect();
            Arc::new(FlatCreateInfo::merge(lists))
        };
        for axis in &self.axes {
            axis.shared.io().flat = Some(flat.clone());
        }
        debug!(
            factory = %self.name,
            index = %self.pipeline_index,
            defines = flat.defines.len(),
            shaders = flat.shader_templates.len(),
            "filled"
        );
        self.flat = Some(flat);

        let participants = self.broadcast(Needs::PREPROCESS, DO_PREPROCESS);
        Self::await_phase(
            ctx,
            participants,
            PipelineFactoryState::CharacteristicsPreprocessed,
            CHARACTERISTICS_PREPROCESSED,
        );
    }

    fn gather_compiled(&mut self) {
        self.shaders.clear();
        self.required.clear();
        for axis in &self.axes {
            let io = axis.shared.io();
            self.shaders.extend(io.compiled.iter().cloned());
            let key = FactoryCharacteristicKey::for_fill_index(axis.shared.id(), io.fill_index);
            for resource in io.required() {
                resource.add_user(key);
                if !self.required.iter().any(|r| r.id() == resource.id()) {
                    self.required.push(resource.clone());
                }
            }
        }
        // Create locks are taken in id order.
        self.required.sort_by_key(|resource| resource.id());
        self.next_resource = 0;
        self.resources.clear();
    }

    fn create_shared_resources(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let task = ctx.task();
        while let Some(resource) = self.required.get(self.next_resource).cloned() {
            if resource.is_created() {
                // Handed the lock after somebody else created it.
                if resource.holds_create_lock(task) {
                    resource.unlock_create(task);
                }
            } else {
                if !resource.lock_create(task, OBTAINED_CREATE_LOCK) {
                    debug!(factory = %self.name, resource = %resource.id(), "waiting for create lock");
                    ctx.wait(OBTAINED_CREATE_LOCK);
                    return Ok(());
                }
                if resource.is_created() {
                    resource.unlock_create(task);
                } else {
                    let handle = match self.context.backend().create_shared_resource(resource.descriptor()) {
                        Ok(handle) => handle,
                        Err(e) => {
                            resource.unlock_create(task);
                            return Err(e.into());
                        }
                    };
                    resource.set_created(handle);
                    info!(factory = %self.name, resource = %resource.id(), name = %resource.descriptor().name, "shared resource created");
                    self.held.push(resource.clone());
                }
            }
            self.next_resource += 1;
        }
        self.release_create_locks(task);

        for resource in &self.required {
            if let Some(handle) = resource.handle() {
                self.resources.push((resource.id(), handle));
            }
        }
        ctx.set_state(PipelineFactoryState::BuildPipeline.state());
        Ok(())
    }

    fn build_pipeline(
        &mut self,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let flat = self.flat.clone().unwrap_or_default();
        let info = PipelineCreateInfo {
            factory: self.index,
            index: self.pipeline_index,
            flat: &flat,
            shaders: &self.shaders,
            resources: &self.resources,
        };
        let pipeline = self.context.backend().create_pipeline(&info, &mut self.blob.lock())?;
        debug!(factory = %self.name, index = %pipeline.index, "pipeline created");
        self.deque.have_new_datum(pipeline);
        self.produced += 1;
        ctx.set_state(PipelineFactoryState::TopMultiloop.state());
        ctx.yield_now();
        Ok(())
    }
}

impl StateMachine for FactoryMachine {
    fn task_name(&self) -> &'static str {
        PipelineFactoryState::LAYER
    }

    fn state_name(
        &self,
        state: StateType,
    ) -> &'static str {
        PipelineFactoryState::name_of(state).unwrap_or("<unknown>")
    }

    fn initial_state(&self) -> StateType {
        PipelineFactoryState::Start.state()
    }

    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let Some(state) = PipelineFactoryState::from_state(state) else {
            panic!("PipelineFactory: unknown state {}", state);
        };
        match state {
            PipelineFactoryState::Start => self.start(ctx)?,
            PipelineFactoryState::Initialize => self.initialize(ctx)?,
            PipelineFactoryState::Initialized => self.spawn_axes(ctx)?,
            PipelineFactoryState::CharacteristicsInitialized => {
                let ranges: Vec<_> = self.axes.iter().map(|axis| axis.shared.range()).collect();
                let multi_loop = MultiLoop::from_ranges(&ranges);
                debug!(factory = %self.name, combinations = multi_loop.size(), "characteristics initialized");
                self.cursor = Some(MultiLoopCursor::new(multi_loop));
                ctx.set_state(PipelineFactoryState::TopMultiloop.state());
            }
            PipelineFactoryState::TopMultiloop => self.top_multiloop(ctx),
            PipelineFactoryState::CharacteristicsFilled => self.characteristics_filled(ctx),
            PipelineFactoryState::CharacteristicsPreprocessed => {
                let participants = self.broadcast(Needs::COMPILE, DO_COMPILE);
                Self::await_phase(
                    ctx,
                    participants,
                    PipelineFactoryState::CharacteristicsCompiled,
                    CHARACTERISTICS_COMPILED,
                );
            }
            PipelineFactoryState::CharacteristicsCompiled => {
                self.gather_compiled();
                ctx.set_state(PipelineFactoryState::CreateSharedResources.state());
            }
            PipelineFactoryState::CreateSharedResources => self.create_shared_resources(ctx)?,
            PipelineFactoryState::BuildPipeline => self.build_pipeline(ctx)?,
        }
        Ok(())
    }

    fn finish_impl(
        &mut self,
        _task: &Arc<Task>,
    ) {
        info!(factory = %self.name, pipelines = self.produced, "pipeline factory finished");
        self.terminate_axes();
        self.deque.set_producer_finished();
        self.signal_cache();
    }

    fn abort_impl(
        &mut self,
        task: &Arc<Task>,
    ) {
        warn!(factory = %self.name, pipelines = self.produced, "pipeline factory aborted");
        self.abandon_create_locks(task);
        self.terminate_axes();
        self.sink.abort();
        self.signal_cache();
        self.context.forget_factory(self.index);
    }
}

/// Create a factory task with its sink; nothing runs yet.
pub(crate) fn create(
    context: &Arc<PipelineContext>,
    index: FactoryIndex,
    name: &str,
    deque: Arc<TaskDeque<Pipeline>>,
    sink: Arc<Task>,
) -> PipelineFactory {
    let shared = Arc::new(FactoryShared::default());
    let machine = FactoryMachine {
        context: context.clone(),
        index,
        name: name.to_string(),
        shared: shared.clone(),
        deque,
        sink: sink.clone(),
        blob: CacheBlob::default(),
        cache_task: None,
        rendezvous: None,
        axes: Vec::new(),
        unstarted: VecDeque::new(),
        layout: IndexLayout::default(),
        cursor: None,
        tuple: LoopTuple::new(),
        pipeline_index: PipelineIndex::default(),
        flat: None,
        shaders: Vec::new(),
        required: Vec::new(),
        next_resource: 0,
        held: Vec::new(),
        resources: Vec::new(),
        produced: 0,
        stalled: None,
    };
    PipelineFactory {
        index,
        name: name.to_string(),
        task: Task::create(machine),
        sink,
        shared,
    }
}
