//! Pipeline generation
//!
//! A [`PipelineFactory`] creates one pipeline for every combination of the
//! fill indices of its characteristics. Everything runs as tasks on the
//! engines of a [`Runtime`](crate::runtime::Runtime):
//!
//! ```text
//!   PipelineContext ──create──► PipelineFactory (normal)
//!                                  ├── PipelineCache (low)
//!                                  ├── CharacteristicRangeTask × axes (normal)
//!                                  └── TaskDeque ──► MoveNewPipelines (high) ──► PipelineStore
//! ```

pub mod backend;
pub mod cache;
pub mod characteristic;
pub mod context;
pub mod create_info;
pub mod error;
pub mod factory;
pub mod key;
pub mod multi_loop;
pub mod range;
pub mod resource;
pub mod sink;
pub mod stock;

pub use backend::{
    HeadlessBackend, HeadlessCompiler, Pipeline, PipelineBackend, PipelineCreateInfo, PipelineHandle, ResourceHandle,
    ShaderCompiler,
};
pub use characteristic::{Characteristic, CharacteristicContext, CharacteristicRangeState, Needs};
pub use context::PipelineContext;
pub use create_info::{CreateInfoItem, FlatCreateInfo, PrimitiveTopology, ShaderStage, ShaderTemplate};
pub use error::PipelineError;
pub use factory::{PipelineFactory, PipelineFactoryState};
pub use key::{CharacteristicIndex, FactoryCharacteristicId, FactoryCharacteristicKey, FactoryIndex};
pub use multi_loop::{LoopTuple, MultiLoop, MultiLoopCursor};
pub use range::{CharacteristicRange, IndexLayout, PipelineIndex};
pub use resource::{ResourceDescriptor, ResourceId, ResourceKind, SharedResource};
pub use sink::{PipelineStore, StoreEvent};
pub use stock::{DefineRange, ShaderProgram};

#[cfg(test)]
mod tests;
