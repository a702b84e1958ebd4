//! taskforge
//!
//! A cooperative task scheduler and, built on it, a pipeline factory that
//! generates every variant of a graphics pipeline in parallel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskforge::pipeline::{DefineRange, PipelineContext};
//! use taskforge::runtime::Runtime;
//!
//! fn main() -> taskforge::Result<()> {
//!     let runtime = Arc::new(Runtime::manual());
//!     let context = PipelineContext::headless(runtime.clone(), None);
//!     let factory = context.create_pipeline_factory("example")?;
//!     factory.add(DefineRange::new("LIGHTS", 0, 4)?);
//!     factory.generate();
//!     runtime.run_until_idle();
//!     assert_eq!(context.store().pipelines(factory.index()).len(), 4);
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod pipeline;
pub mod runtime;
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::pipeline::{DefineRange, Pipeline, PipelineContext, ShaderProgram, ShaderStage};
use crate::runtime::Runtime;
use crate::util::config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "taskforge";

const VERTEX_SOURCE: &str = "#version 450\nlayout(location = 0) in vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }\n";
const FRAGMENT_SOURCE: &str = "#version 450\nlayout(location = 0) out vec4 color;\nvoid main() { color = vec4(1.0); }\n";

/// Generate one pipeline per combination of `axes` on the headless backend.
///
/// Axis `k` is a define `AXIS<k>` taking the values `0..axes[k]`.
pub fn generate(
    config: &Config,
    axes: &[i32],
) -> Result<Vec<Pipeline>> {
    let runtime = Arc::new(Runtime::new(&config.scheduler).context("failed to start the runtime")?);
    let context = PipelineContext::headless(runtime.clone(), config.cache.resolve_dir());

    let factory = context.create_pipeline_factory(NAME)?;
    for (k, &size) in axes.iter().enumerate() {
        factory.add(DefineRange::new(format!("AXIS{}", k), 0, size)?);
    }
    factory.add(
        ShaderProgram::new("quad")
            .with_shader(ShaderStage::Vertex, VERTEX_SOURCE)
            .with_shader(ShaderStage::Fragment, FRAGMENT_SOURCE),
    );
    debug!(axes = ?axes, "generating");
    factory.generate();
    runtime.run_until_idle();

    let aborted = factory.is_aborted();
    let pipelines = context.store().pipelines(factory.index());
    context.abort_all_factories();
    runtime.shutdown();
    if aborted {
        anyhow::bail!("pipeline factory {} aborted", factory.name());
    }
    info!(pipelines = pipelines.len(), "generation done");
    Ok(pipelines)
}

/// Check a pipeline cache file and return its payload size.
pub fn inspect_cache(path: &Path) -> Result<usize> {
    let payload = pipeline::cache::read_cache_file(path)?;
    Ok(payload.len())
}
