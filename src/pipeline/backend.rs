//! Collaborators that create the actual GPU objects.
//!
//! The factory only sees these traits. [`HeadlessBackend`] and
//! [`HeadlessCompiler`] implement them without a device, for tools and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use indexmap::IndexMap;

use super::create_info::{CompiledShader, FlatCreateInfo, PreprocessedShader, PrimitiveTopology, ShaderStage};
use super::error::PipelineError;
use super::key::FactoryIndex;
use super::range::PipelineIndex;
use super::resource::{ResourceDescriptor, ResourceId};

/// Opaque handle of a created shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// Opaque handle of a created pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Everything needed to create one pipeline variant.
#[derive(Debug)]
pub struct PipelineCreateInfo<'a> {
    pub factory: FactoryIndex,
    pub index: PipelineIndex,
    pub flat: &'a FlatCreateInfo,
    pub shaders: &'a [CompiledShader],
    pub resources: &'a [(ResourceId, ResourceHandle)],
}

/// A created pipeline variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub factory: FactoryIndex,
    pub index: PipelineIndex,
    pub handle: PipelineHandle,
    pub stages: Vec<ShaderStage>,
    pub topology: PrimitiveTopology,
    pub defines: IndexMap<String, String>,
    pub resources: Vec<ResourceHandle>,
}

/// Compiles preprocessed shader source.
pub trait ShaderCompiler: Send + Sync + 'static {
    fn compile(
        &self,
        shader: &PreprocessedShader,
    ) -> Result<CompiledShader, PipelineError>;
}

/// Creates shared resources and pipelines.
pub trait PipelineBackend: Send + Sync + 'static {
    fn create_shared_resource(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<ResourceHandle, PipelineError>;

    /// Create a pipeline; `cache` is the pipeline cache blob of the factory and
    /// may be extended.
    fn create_pipeline(
        &self,
        info: &PipelineCreateInfo<'_>,
        cache: &mut Vec<u8>,
    ) -> Result<Pipeline, PipelineError>;
}

/// Accepts any source; a line starting with `#error` fails the compile.
#[derive(Debug, Default)]
pub struct HeadlessCompiler {
    compiled: AtomicUsize,
}

impl HeadlessCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn compiled(&self) -> usize {
        self.compiled.load(Ordering::Relaxed)
    }
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

impl ShaderCompiler for HeadlessCompiler {
    fn compile(
        &self,
        shader: &PreprocessedShader,
    ) -> Result<CompiledShader, PipelineError> {
        if let Some(line) = shader.source.lines().find(|l| l.trim_start().starts_with("#error")) {
            return Err(PipelineError::ShaderCompile {
                stage: shader.stage,
                name: shader.name.clone(),
                message: line.trim_start().trim_start_matches("#error").trim().to_string(),
            });
        }
        let mut hasher = DefaultHasher::new();
        shader.source.hash(&mut hasher);
        let hash = hasher.finish();
        self.compiled.fetch_add(1, Ordering::Relaxed);
        Ok(CompiledShader {
            stage: shader.stage,
            name: shader.name.clone(),
            code: vec![SPIRV_MAGIC, hash as u32, (hash >> 32) as u32],
        })
    }
}

/// Hands out handles without creating anything.
///
/// The pipeline cache blob is a list of little-endian `u64` pipeline indices;
/// creating a pipeline whose index is already listed counts as a cache hit.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: AtomicU64,
    resources_created: AtomicUsize,
    pipelines_created: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn resources_created(&self) -> usize {
        self.resources_created.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pipelines_created(&self) -> usize {
        self.pipelines_created.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

impl PipelineBackend for HeadlessBackend {
    fn create_shared_resource(
        &self,
        _descriptor: &ResourceDescriptor,
    ) -> Result<ResourceHandle, PipelineError> {
        self.resources_created.fetch_add(1, Ordering::Relaxed);
        Ok(ResourceHandle(self.handle()))
    }

    fn create_pipeline(
        &self,
        info: &PipelineCreateInfo<'_>,
        cache: &mut Vec<u8>,
    ) -> Result<Pipeline, PipelineError> {
        let record = info.index.inner().to_le_bytes();
        if cache.chunks_exact(8).any(|chunk| chunk == record) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            cache.extend_from_slice(&record);
        }
        self.pipelines_created.fetch_add(1, Ordering::Relaxed);

        Ok(Pipeline {
            factory: info.factory,
            index: info.index,
            handle: PipelineHandle(self.handle()),
            stages: info.shaders.iter().map(|s| s.stage).collect(),
            topology: info.flat.topology,
            defines: info.flat.defines.clone(),
            resources: info.resources.iter().map(|(_, handle)| *handle).collect(),
        })
    }
}
