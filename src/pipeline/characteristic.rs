//! Characteristics: the axes a pipeline factory varies over.
//!
//! A [`Characteristic`] is what users implement. The factory runs each one in a
//! [`CharacteristicRangeTask`], a task that parks between phases and is driven
//! by the factory with conditions:
//!
//! ```text
//!   initialize ──► fill_or_terminate ──(do_fill)──► fill ──► filled ─┐
//!                        ▲                                           │
//!                        ├────────── compile ◄── preprocess ◄────────┘
//!                        │   (do_compile)      (do_preprocess)
//!                        └── terminate: finish
//! ```
//!
//! Which of fill, preprocess and compile an axis takes part in is given by
//! [`Characteristic::needs`]; the phases it skips it never waits for. Every
//! phase first checks the terminate flag.
//!
//! The run states of the task come right after the base task's states. A
//! characteristic may add its own states after [`CharacteristicRangeState::END`]
//! and handles those in [`Characteristic::multiplex_ext`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::ShaderCompiler;
use super::create_info::{CompiledShader, CreateInfoItem, FlatCreateInfo, PreprocessedShader, ShaderTemplate};
use super::key::{CharacteristicIndex, FactoryCharacteristicId};
use super::range::CharacteristicRange;
use super::resource::SharedResource;
use crate::runtime::scheduler::{
    Condition, ConditionTable, StateLayer, StateMachine, StateType, Task, TaskContext, TASK_STATE_END,
};

pub const DO_FILL: Condition = 0x1;
pub const DO_PREPROCESS: Condition = 0x2;
pub const DO_COMPILE: Condition = 0x4;
pub const DO_TERMINATE: Condition = 0x8;

pub const CHARACTERISTIC_CONDITIONS: ConditionTable = ConditionTable::new(&[
    (DO_FILL, "do_fill"),
    (DO_PREPROCESS, "do_preprocess"),
    (DO_COMPILE, "do_compile"),
    (DO_TERMINATE, "do_terminate"),
]);

/// The phases an axis takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Needs(u32);

impl Needs {
    pub const NONE: Needs = Needs(0);
    pub const FILL: Needs = Needs(DO_FILL);
    pub const PREPROCESS: Needs = Needs(DO_PREPROCESS);
    pub const COMPILE: Needs = Needs(DO_COMPILE);

    #[inline]
    pub fn contains(
        self,
        other: Needs,
    ) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Needs {
    type Output = Needs;

    fn bitor(
        self,
        rhs: Needs,
    ) -> Needs {
        Needs(self.0 | rhs.0)
    }
}

impl fmt::Display for Needs {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&CHARACTERISTIC_CONDITIONS.describe(self.0))
    }
}

/// One axis of pipeline variation.
pub trait Characteristic: Send + 'static {
    fn name(&self) -> &str;

    /// The fill indices of this axis. A plain characteristic has one value.
    fn range(&self) -> CharacteristicRange {
        CharacteristicRange::default()
    }

    /// The phases this axis takes part in; multi-valued ranges fill by default.
    fn needs(&self) -> Needs {
        if self.range().is_single() {
            Needs::NONE
        } else {
            Needs::FILL
        }
    }

    /// Contributions shared by every pipeline of the factory.
    fn initialize(
        &mut self,
        _cx: &mut CharacteristicContext<'_, '_>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Contributions for fill index `index`.
    ///
    /// Continues in `filled` unless the characteristic moves to one of its own
    /// states, which must eventually continue in `filled`.
    fn fill(
        &mut self,
        _index: i32,
        _cx: &mut CharacteristicContext<'_, '_>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run one of the characteristic's own states.
    fn multiplex_ext(
        &mut self,
        state: StateType,
        _cx: &mut CharacteristicContext<'_, '_>,
    ) -> anyhow::Result<()> {
        panic!("{}: unknown state {}", self.name(), state);
    }

    fn ext_state_name(
        &self,
        _state: StateType,
    ) -> &'static str {
        "<unknown>"
    }
}

/// What a characteristic sees while it runs.
pub struct CharacteristicContext<'c, 't> {
    ctx: &'c mut TaskContext<'t>,
    id: FactoryCharacteristicId,
    fill_index: Option<i32>,
    items: &'c mut Vec<CreateInfoItem>,
    required: &'c mut Vec<Arc<SharedResource>>,
}

impl<'c, 't> CharacteristicContext<'c, 't> {
    #[inline]
    pub fn id(&self) -> FactoryCharacteristicId {
        self.id
    }

    /// The index being filled; `None` outside of a fill.
    #[inline]
    pub fn fill_index(&self) -> Option<i32> {
        self.fill_index
    }

    pub fn add(
        &mut self,
        item: CreateInfoItem,
    ) {
        self.items.push(item);
    }

    pub fn add_define(
        &mut self,
        name: impl Into<String>,
        value: impl ToString,
    ) {
        self.items.push(CreateInfoItem::Define {
            name: name.into(),
            value: value.to_string(),
        });
    }

    pub fn add_shader(
        &mut self,
        template: ShaderTemplate,
    ) {
        self.items.push(CreateInfoItem::ShaderStage(template));
    }

    /// The pipeline needs `resource`; the factory creates it if nobody did.
    pub fn require(
        &mut self,
        resource: &Arc<SharedResource>,
    ) {
        if !self.required.iter().any(|r| r.id() == resource.id()) {
            self.required.push(resource.clone());
        }
    }

    /// The task context, for characteristics with their own states.
    #[inline]
    pub fn task_context(&mut self) -> &mut TaskContext<'t> {
        self.ctx
    }

    #[inline]
    pub fn set_state(
        &mut self,
        state: StateType,
    ) {
        self.ctx.set_state(state);
    }

    /// Done with the fill; continue in `filled`.
    #[inline]
    pub fn fill_done(&mut self) {
        self.ctx.set_state(CharacteristicRangeState::Filled.state());
    }
}

/// Run states of [`CharacteristicRangeTask`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicRangeState {
    Initialize = TASK_STATE_END,
    FillOrTerminate,
    Fill,
    Filled,
    Preprocess,
    Compile,
}

impl StateLayer for CharacteristicRangeState {
    const LAYER: &'static str = "CharacteristicRange";
    const BEGIN: StateType = TASK_STATE_END;
    const TABLE: &'static [(Self, &'static str)] = &[
        (CharacteristicRangeState::Initialize, "CharacteristicRange_initialize"),
        (CharacteristicRangeState::FillOrTerminate, "CharacteristicRange_fill_or_terminate"),
        (CharacteristicRangeState::Fill, "CharacteristicRange_fill"),
        (CharacteristicRangeState::Filled, "CharacteristicRange_filled"),
        (CharacteristicRangeState::Preprocess, "CharacteristicRange_preprocess"),
        (CharacteristicRangeState::Compile, "CharacteristicRange_compile"),
    ];

    #[inline]
    fn state(self) -> StateType {
        self as StateType
    }
}

/// Counts the axes that still have to report back for the current phase.
///
/// The last one to report signals the factory.
#[derive(Debug)]
pub struct Rendezvous {
    pending: AtomicUsize,
    factory: Weak<Task>,
}

impl Rendezvous {
    pub fn new(factory: &Arc<Task>) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            factory: Arc::downgrade(factory),
        }
    }

    /// Expect `participants` reports. Must happen before they are signalled.
    pub fn arm(
        &self,
        participants: usize,
    ) {
        let previous = self.pending.swap(participants, Ordering::AcqRel);
        debug_assert_eq!(previous, 0, "rendezvous armed while {} reports are outstanding", previous);
    }

    pub fn report(
        &self,
        condition: Condition,
    ) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unexpected report");
        if previous == 1 {
            if let Some(factory) = self.factory.upgrade() {
                factory.signal(condition);
            }
        }
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Data exchanged between an axis task and its factory.
#[derive(Debug, Default)]
pub struct AxisIo {
    pub fill_index: Option<i32>,
    pub initial_items: Vec<CreateInfoItem>,
    pub fill_items: Vec<CreateInfoItem>,
    pub initial_required: Vec<Arc<SharedResource>>,
    pub fill_required: Vec<Arc<SharedResource>>,
    pub flat: Option<Arc<FlatCreateInfo>>,
    pub preprocessed: Vec<PreprocessedShader>,
    pub compiled: Vec<CompiledShader>,
}

impl AxisIo {
    /// Every item this axis contributes to the current pipeline.
    pub fn items(&self) -> impl Iterator<Item = &CreateInfoItem> {
        self.initial_items.iter().chain(self.fill_items.iter())
    }

    pub fn required(&self) -> impl Iterator<Item = &Arc<SharedResource>> {
        self.initial_required.iter().chain(self.fill_required.iter())
    }

    fn shader_templates(&self) -> Vec<ShaderTemplate> {
        self.items()
            .filter_map(|item| match item {
                CreateInfoItem::ShaderStage(template) => Some(template.clone()),
                _ => None,
            })
            .collect()
    }
}

/// The part of an axis the factory shares with the axis task.
#[derive(Debug)]
pub struct AxisShared {
    id: FactoryCharacteristicId,
    name: String,
    range: CharacteristicRange,
    needs: Needs,
    terminate: AtomicBool,
    io: Mutex<AxisIo>,
}

impl AxisShared {
    pub fn new(
        id: FactoryCharacteristicId,
        characteristic: &dyn Characteristic,
    ) -> Self {
        Self {
            id,
            name: characteristic.name().to_string(),
            range: characteristic.range(),
            needs: characteristic.needs(),
            terminate: AtomicBool::new(false),
            io: Mutex::new(AxisIo::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> FactoryCharacteristicId {
        self.id
    }

    #[inline]
    pub fn index(&self) -> CharacteristicIndex {
        self.id.characteristic
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn range(&self) -> CharacteristicRange {
        self.range
    }

    #[inline]
    pub fn needs(&self) -> Needs {
        self.needs
    }

    #[inline]
    pub fn io(&self) -> parking_lot::MutexGuard<'_, AxisIo> {
        self.io.lock()
    }

    #[inline]
    pub fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Ask the axis task to finish; wakes it from whatever it waits on.
    pub fn terminate(
        &self,
        task: &Arc<Task>,
    ) {
        if self.terminate.swap(true, Ordering::AcqRel) {
            return;
        }
        task.signal(DO_FILL | DO_PREPROCESS | DO_COMPILE | DO_TERMINATE);
    }
}

/// Which report a phase sends back to the factory.
#[derive(Debug, Clone, Copy)]
pub struct PhaseReports {
    pub initialized: Condition,
    pub filled: Condition,
    pub preprocessed: Condition,
    pub compiled: Condition,
}

/// The task that runs one [`Characteristic`] for a factory.
pub struct CharacteristicRangeTask {
    characteristic: Box<dyn Characteristic>,
    shared: Arc<AxisShared>,
    rendezvous: Arc<Rendezvous>,
    reports: PhaseReports,
    compiler: Arc<dyn ShaderCompiler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fill,
    Preprocess,
    Compile,
}

impl CharacteristicRangeTask {
    pub fn new(
        characteristic: Box<dyn Characteristic>,
        shared: Arc<AxisShared>,
        rendezvous: Arc<Rendezvous>,
        reports: PhaseReports,
        compiler: Arc<dyn ShaderCompiler>,
    ) -> Self {
        Self {
            characteristic,
            shared,
            rendezvous,
            reports,
            compiler,
        }
    }

    /// Wait for the first phase after `after` that this axis takes part in.
    fn park(
        &self,
        after: Option<Phase>,
        ctx: &mut TaskContext<'_>,
    ) {
        const CYCLE: [Phase; 3] = [Phase::Fill, Phase::Preprocess, Phase::Compile];
        let start = match after {
            None => 0,
            Some(phase) => CYCLE.iter().position(|&p| p == phase).map_or(0, |i| i + 1),
        };
        let needs = self.shared.needs;
        let next = (0..CYCLE.len()).map(|i| CYCLE[(start + i) % CYCLE.len()]).find(|phase| match phase {
            Phase::Fill => needs.contains(Needs::FILL),
            Phase::Preprocess => needs.contains(Needs::PREPROCESS),
            Phase::Compile => needs.contains(Needs::COMPILE),
        });
        let (state, condition) = match next {
            Some(Phase::Fill) => (CharacteristicRangeState::FillOrTerminate, DO_FILL),
            Some(Phase::Preprocess) => (CharacteristicRangeState::Preprocess, DO_PREPROCESS),
            Some(Phase::Compile) => (CharacteristicRangeState::Compile, DO_COMPILE),
            None => (CharacteristicRangeState::FillOrTerminate, DO_TERMINATE),
        };
        trace!(axis = %self.shared.name, condition = %CHARACTERISTIC_CONDITIONS.describe(condition), "park");
        ctx.set_state(state.state());
        ctx.wait(condition);
    }

    fn run_characteristic<F>(
        &mut self,
        ctx: &mut TaskContext<'_>,
        during_fill: bool,
        f: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce(&mut dyn Characteristic, &mut CharacteristicContext<'_, '_>) -> anyhow::Result<()>,
    {
        let mut io = self.shared.io.lock();
        let AxisIo {
            fill_index,
            initial_items,
            fill_items,
            initial_required,
            fill_required,
            ..
        } = &mut *io;
        let (items, required) = if during_fill {
            (fill_items, fill_required)
        } else {
            (initial_items, initial_required)
        };
        let mut cx = CharacteristicContext {
            ctx,
            id: self.shared.id,
            fill_index: *fill_index,
            items,
            required,
        };
        f(self.characteristic.as_mut(), &mut cx)
    }
}

impl StateMachine for CharacteristicRangeTask {
    fn task_name(&self) -> &'static str {
        CharacteristicRangeState::LAYER
    }

    fn state_name(
        &self,
        state: StateType,
    ) -> &'static str {
        CharacteristicRangeState::name_of(state).unwrap_or_else(|| self.characteristic.ext_state_name(state))
    }

    fn initial_state(&self) -> StateType {
        CharacteristicRangeState::Initialize.state()
    }

    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let Some(state) = CharacteristicRangeState::from_state(state) else {
            let during_fill = self.shared.io.lock().fill_index.is_some();
            return self.run_characteristic(ctx, during_fill, |c, cx| c.multiplex_ext(state, cx));
        };

        let terminating = self.shared.is_terminating();
        match state {
            CharacteristicRangeState::Initialize => {
                self.run_characteristic(ctx, false, |c, cx| c.initialize(cx))?;
                debug!(axis = %self.shared.name, range = %self.shared.range, needs = %self.shared.needs, "initialized");
                self.rendezvous.report(self.reports.initialized);
                self.park(None, ctx);
            }
            _ if terminating => {
                debug!(axis = %self.shared.name, "terminated");
                ctx.finish();
            }
            CharacteristicRangeState::FillOrTerminate => {
                if !self.shared.needs.contains(Needs::FILL) {
                    // Woken without a terminate request; nothing to do.
                    self.park(None, ctx);
                    return Ok(());
                }
                let mut io = self.shared.io.lock();
                io.fill_items.clear();
                io.fill_required.clear();
                ctx.set_state(CharacteristicRangeState::Fill.state());
            }
            CharacteristicRangeState::Fill => {
                let index = match self.shared.io.lock().fill_index {
                    Some(index) => index,
                    None => panic!("{}: fill without a fill index", self.shared.name),
                };
                ctx.set_state(CharacteristicRangeState::Filled.state());
                self.run_characteristic(ctx, true, |c, cx| c.fill(index, cx))?;
            }
            CharacteristicRangeState::Filled => {
                self.rendezvous.report(self.reports.filled);
                self.park(Some(Phase::Fill), ctx);
            }
            CharacteristicRangeState::Preprocess => {
                {
                    let mut io = self.shared.io.lock();
                    let flat = io.flat.clone().unwrap_or_default();
                    io.preprocessed = io
                        .shader_templates()
                        .iter()
                        .map(|template| template.preprocess(&flat.defines))
                        .collect();
                }
                self.rendezvous.report(self.reports.preprocessed);
                self.park(Some(Phase::Preprocess), ctx);
            }
            CharacteristicRangeState::Compile => {
                {
                    let mut io = self.shared.io.lock();
                    let compiled = io
                        .preprocessed
                        .iter()
                        .map(|shader| self.compiler.compile(shader))
                        .collect::<Result<Vec<_>, _>>()?;
                    io.compiled = compiled;
                }
                self.rendezvous.report(self.reports.compiled);
                self.park(Some(Phase::Compile), ctx);
            }
        }
        Ok(())
    }
}
