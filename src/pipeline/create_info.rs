//! What characteristics contribute to a pipeline, and how it is merged.
//!
//! Every axis hands the factory a list of [`CreateInfoItem`]s. The factory
//! merges the lists of all axes, in axis order, into one [`FlatCreateInfo`].

use std::fmt;

use indexmap::{IndexMap, IndexSet};

/// A programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// The stage as a bit of a stage mask.
    #[inline]
    pub fn bit(&self) -> u32 {
        match self {
            ShaderStage::Vertex => 0x1,
            ShaderStage::Fragment => 0x10,
            ShaderStage::Compute => 0x20,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DynamicState {
    Viewport,
    Scissor,
    LineWidth,
    DepthBias,
    BlendConstants,
}

/// A shader source before preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderTemplate {
    pub stage: ShaderStage,
    pub name: String,
    pub source: String,
}

impl ShaderTemplate {
    pub fn new(
        stage: ShaderStage,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            name: name.into(),
            source: source.into(),
        }
    }

    /// Insert the defines right after the `#version` line (or at the top).
    pub fn preprocess(
        &self,
        defines: &IndexMap<String, String>,
    ) -> PreprocessedShader {
        let mut block = String::new();
        for (name, value) in defines {
            block.push_str("#define ");
            block.push_str(name);
            if !value.is_empty() {
                block.push(' ');
                block.push_str(value);
            }
            block.push('\n');
        }

        let mut source = String::with_capacity(self.source.len() + block.len());
        let mut inserted = false;
        for line in self.source.split_inclusive('\n') {
            source.push_str(line);
            if !inserted && line.trim_start().starts_with("#version") {
                if !line.ends_with('\n') {
                    source.push('\n');
                }
                source.push_str(&block);
                inserted = true;
            }
        }
        if !inserted {
            source.insert_str(0, &block);
        }

        PreprocessedShader {
            stage: self.stage,
            name: self.name.clone(),
            source,
        }
    }
}

/// Shader source with all defines substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedShader {
    pub stage: ShaderStage,
    pub name: String,
    pub source: String,
}

/// The output of the shader compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub name: String,
    pub code: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub binding: u32,
    pub location: u32,
    pub format: String,
    pub offset: u32,
}

/// A push constant range: `size` bytes at `offset`, visible to `stages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: u32,
    pub offset: u32,
    pub size: u32,
}

impl PushConstantRange {
    #[inline]
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// One contribution of a characteristic to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateInfoItem {
    ShaderStage(ShaderTemplate),
    VertexAttribute(VertexAttribute),
    PushConstant(PushConstantRange),
    DynamicState(DynamicState),
    Topology(PrimitiveTopology),
    Define { name: String, value: String },
}

/// The merged contributions of all axes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatCreateInfo {
    pub shader_templates: Vec<ShaderTemplate>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub dynamic_states: IndexSet<DynamicState>,
    pub topology: PrimitiveTopology,
    pub defines: IndexMap<String, String>,
}

impl FlatCreateInfo {
    /// Merge the items of every axis, in axis order.
    pub fn merge<'a, I>(axes: I) -> Self
    where
        I: IntoIterator<Item = &'a [CreateInfoItem]>,
    {
        let mut flat = FlatCreateInfo::default();
        let mut push_constants = Vec::new();
        for items in axes {
            for item in items {
                match item {
                    CreateInfoItem::ShaderStage(template) => flat.shader_templates.push(template.clone()),
                    CreateInfoItem::VertexAttribute(attribute) => flat.vertex_attributes.push(attribute.clone()),
                    CreateInfoItem::PushConstant(range) => push_constants.push(*range),
                    CreateInfoItem::DynamicState(state) => {
                        flat.dynamic_states.insert(*state);
                    }
                    CreateInfoItem::Topology(topology) => flat.topology = *topology,
                    CreateInfoItem::Define { name, value } => {
                        flat.defines.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        flat.push_constant_ranges = merge_push_constant_ranges(push_constants);
        flat
    }
}

/// Sort by offset and join overlapping or touching ranges with the same stages.
pub fn merge_push_constant_ranges(mut ranges: Vec<PushConstantRange>) -> Vec<PushConstantRange> {
    ranges.sort_by_key(|r| (r.stages, r.offset, r.size));
    let mut merged: Vec<PushConstantRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.stages == range.stages && range.offset <= last.end() => {
                let end = last.end().max(range.end());
                last.size = end - last.offset;
            }
            _ => merged.push(range),
        }
    }
    merged.sort_by_key(|r| (r.offset, r.stages));
    merged
}
