//! Where finished pipelines end up.
//!
//! Each factory feeds a [`TaskDeque`](crate::runtime::deque::TaskDeque) that is
//! drained by a consumer task running [`MoveNewPipelines`]. It moves every
//! pipeline into the shared [`PipelineStore`] and reports the factory as done
//! once the factory finished and the deque ran dry. When the factory aborts,
//! the pipelines it already published are withdrawn again.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::Pipeline;
use super::key::FactoryIndex;
use super::range::PipelineIndex;
use crate::runtime::deque::DatumHandler;

/// What the store observed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Pipeline { factory: FactoryIndex, index: PipelineIndex },
    FactoryDone(FactoryIndex),
    FactoryAborted(FactoryIndex),
}

/// All pipelines of a context, keyed by factory and pipeline index.
#[derive(Debug, Default)]
pub struct PipelineStore {
    pipelines: Mutex<IndexMap<(FactoryIndex, PipelineIndex), Pipeline>>,
    done: Mutex<IndexSet<FactoryIndex>>,
    aborted: Mutex<IndexSet<FactoryIndex>>,
    events: Mutex<Vec<StoreEvent>>,
}

impl PipelineStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn have_new_pipeline(
        &self,
        pipeline: Pipeline,
    ) {
        let key = (pipeline.factory, pipeline.index);
        self.events.lock().push(StoreEvent::Pipeline {
            factory: pipeline.factory,
            index: pipeline.index,
        });
        if self.pipelines.lock().insert(key, pipeline).is_some() {
            warn!(factory = %key.0, index = %key.1, "pipeline replaced");
        }
    }

    pub fn pipeline_factory_done(
        &self,
        factory: FactoryIndex,
    ) {
        self.events.lock().push(StoreEvent::FactoryDone(factory));
        self.done.lock().insert(factory);
    }

    /// Withdraw every pipeline of `factory`. Returns how many there were.
    pub fn pipeline_factory_aborted(
        &self,
        factory: FactoryIndex,
    ) -> usize {
        let withdrawn = {
            let mut pipelines = self.pipelines.lock();
            let before = pipelines.len();
            pipelines.retain(|(f, _), _| *f != factory);
            before - pipelines.len()
        };
        self.events.lock().push(StoreEvent::FactoryAborted(factory));
        self.aborted.lock().insert(factory);
        withdrawn
    }

    pub fn get(
        &self,
        factory: FactoryIndex,
        index: PipelineIndex,
    ) -> Option<Pipeline> {
        self.pipelines.lock().get(&(factory, index)).cloned()
    }

    /// The pipelines of `factory` in arrival order.
    pub fn pipelines(
        &self,
        factory: FactoryIndex,
    ) -> Vec<Pipeline> {
        self.pipelines
            .lock()
            .iter()
            .filter(|((f, _), _)| *f == factory)
            .map(|(_, pipeline)| pipeline.clone())
            .collect()
    }

    #[inline]
    pub fn is_done(
        &self,
        factory: FactoryIndex,
    ) -> bool {
        self.done.lock().contains(&factory)
    }

    #[inline]
    pub fn is_aborted(
        &self,
        factory: FactoryIndex,
    ) -> bool {
        self.aborted.lock().contains(&factory)
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }
}

/// Moves the pipelines of one factory into the store.
#[derive(Debug)]
pub struct MoveNewPipelines {
    store: Arc<PipelineStore>,
    factory: FactoryIndex,
    name: String,
    moved: usize,
}

impl MoveNewPipelines {
    pub fn new(
        store: Arc<PipelineStore>,
        factory: FactoryIndex,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            factory,
            name: name.into(),
            moved: 0,
        }
    }
}

impl DatumHandler<Pipeline> for MoveNewPipelines {
    fn handle(
        &mut self,
        pipeline: Pipeline,
    ) {
        debug!(factory = %self.name, index = %pipeline.index, "new pipeline");
        self.moved += 1;
        self.store.have_new_pipeline(pipeline);
    }

    fn producer_finished(&mut self) {
        info!(factory = %self.name, pipelines = self.moved, "pipeline factory done");
        self.store.pipeline_factory_done(self.factory);
    }

    fn discard(
        &mut self,
        pipeline: Pipeline,
    ) {
        warn!(factory = %self.name, index = %pipeline.index, "discarding pipeline");
    }

    fn consumer_aborted(&mut self) {
        let withdrawn = self.store.pipeline_factory_aborted(self.factory);
        if withdrawn > 0 {
            warn!(factory = %self.name, withdrawn, "pipeline factory aborted; pipelines withdrawn");
        }
    }
}
