//! Pipeline generation errors.

use std::path::PathBuf;

use thiserror::Error;

use super::create_info::ShaderStage;

/// Errors raised while generating pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to compile {stage} shader \"{name}\": {message}")]
    ShaderCompile {
        stage: ShaderStage,
        name: String,
        message: String,
    },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("pipeline cache {} is corrupted: {reason}", .path.display())]
    CacheCorrupted { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline factory \"{0}\" has no characteristics")]
    EmptyFactory(String),

    #[error("invalid range [{begin}, {end})")]
    InvalidRange { begin: i32, end: i32 },

    #[error("pipeline factory \"{factory}\" needs {needed} tasks on engine {engine} but its limit is {limit}")]
    AdmissionLimit {
        factory: String,
        engine: String,
        needed: usize,
        limit: usize,
    },

    #[error("pipeline factory \"{factory}\" needs {bits} index bits; at most 64 fit")]
    IndexTooWide { factory: String, bits: u32 },
}

impl PipelineError {
    pub(crate) fn io(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
