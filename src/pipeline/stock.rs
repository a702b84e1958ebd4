//! Ready-made characteristics.

use std::sync::Arc;

use super::characteristic::{Characteristic, CharacteristicContext, Needs};
use super::create_info::{CreateInfoItem, PrimitiveTopology, ShaderStage, ShaderTemplate};
use super::error::PipelineError;
use super::range::CharacteristicRange;
use super::resource::SharedResource;

/// Varies one preprocessor define over a range of values.
#[derive(Debug, Clone)]
pub struct DefineRange {
    name: String,
    define: String,
    range: CharacteristicRange,
}

impl DefineRange {
    /// `define` takes every value in `[begin, end)`.
    pub fn new(
        define: impl Into<String>,
        begin: i32,
        end: i32,
    ) -> Result<Self, PipelineError> {
        let define = define.into();
        Ok(Self {
            name: format!("DefineRange({})", define),
            define,
            range: CharacteristicRange::new(begin, end)?,
        })
    }

    #[inline]
    pub fn define(&self) -> &str {
        &self.define
    }
}

impl Characteristic for DefineRange {
    fn name(&self) -> &str {
        &self.name
    }

    fn range(&self) -> CharacteristicRange {
        self.range
    }

    fn fill(
        &mut self,
        index: i32,
        cx: &mut CharacteristicContext<'_, '_>,
    ) -> anyhow::Result<()> {
        cx.add_define(self.define.clone(), index);
        Ok(())
    }
}

/// Contributes shader stages, preprocesses them with the merged defines and
/// compiles them.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    name: String,
    shaders: Vec<ShaderTemplate>,
    topology: Option<PrimitiveTopology>,
    resources: Vec<Arc<SharedResource>>,
}

impl ShaderProgram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shaders: Vec::new(),
            topology: None,
            resources: Vec::new(),
        }
    }

    pub fn with_shader(
        mut self,
        stage: ShaderStage,
        source: impl Into<String>,
    ) -> Self {
        let name = format!("{}.{}", self.name, stage);
        self.shaders.push(ShaderTemplate::new(stage, name, source));
        self
    }

    pub fn with_topology(
        mut self,
        topology: PrimitiveTopology,
    ) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Every pipeline of the program uses `resource`.
    pub fn with_resource(
        mut self,
        resource: Arc<SharedResource>,
    ) -> Self {
        self.resources.push(resource);
        self
    }
}

impl Characteristic for ShaderProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs(&self) -> Needs {
        Needs::PREPROCESS | Needs::COMPILE
    }

    fn initialize(
        &mut self,
        cx: &mut CharacteristicContext<'_, '_>,
    ) -> anyhow::Result<()> {
        for shader in &self.shaders {
            cx.add_shader(shader.clone());
        }
        if let Some(topology) = self.topology {
            cx.add(CreateInfoItem::Topology(topology));
        }
        for resource in &self.resources {
            cx.require(resource);
        }
        Ok(())
    }
}
