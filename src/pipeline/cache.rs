//! Pipeline cache files and the task that loads and saves them.
//!
//! File format: `size: u64` (little endian) followed by exactly `size` bytes.
//!
//! ```text
//!   initialize ──► load_from_disk ──► ready ──(factory_finished)──► save_to_disk ──► done
//!        ▲               │
//!        └── corrupted ──┘   (file deleted, start over empty)
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::PipelineError;
use crate::runtime::scheduler::{Condition, StateLayer, StateMachine, StateType, Task, TaskContext, TASK_STATE_END};

/// Signalled by the factory once it created its last pipeline.
pub const FACTORY_FINISHED: Condition = 1;

const SIZE_PREFIX: usize = std::mem::size_of::<u64>();

/// File name of a pipeline cache inside its factory directory.
pub const CACHE_FILE_NAME: &str = "pipeline_cache";

/// `<cache_dir>/<factory name>/pipeline_cache`
pub fn cache_path(
    cache_dir: &Path,
    factory_name: &str,
) -> PathBuf {
    cache_dir.join(factory_name).join(CACHE_FILE_NAME)
}

pub fn encode_blob(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SIZE_PREFIX + data.len());
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Check the size prefix and return the payload.
pub fn decode_blob(
    path: &Path,
    bytes: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    let corrupted = |reason: String| PipelineError::CacheCorrupted {
        path: path.to_path_buf(),
        reason,
    };
    let Some((prefix, payload)) = bytes.split_first_chunk::<SIZE_PREFIX>() else {
        return Err(corrupted(format!("file is {} bytes, shorter than its size field", bytes.len())));
    };
    let size = u64::from_le_bytes(*prefix);
    if size != payload.len() as u64 {
        return Err(corrupted(format!("size field says {} bytes but {} follow", size, payload.len())));
    }
    Ok(payload.to_vec())
}

pub fn read_cache_file(path: &Path) -> Result<Vec<u8>, PipelineError> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    decode_blob(path, &bytes)
}

/// Write the file atomically: a temporary file in the same directory is
/// renamed over `path`.
pub fn write_cache_file(
    path: &Path,
    data: &[u8],
) -> Result<(), PipelineError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
    file.write_all(&encode_blob(data))
        .and_then(|()| file.as_file().sync_all())
        .map_err(|e| PipelineError::io(file.path(), e))?;
    file.persist(path).map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}

/// Run states of [`PipelineCache`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCacheState {
    Initialize = TASK_STATE_END,
    LoadFromDisk,
    Ready,
    SaveToDisk,
}

impl StateLayer for PipelineCacheState {
    const LAYER: &'static str = "PipelineCache";
    const BEGIN: StateType = TASK_STATE_END;
    const TABLE: &'static [(Self, &'static str)] = &[
        (PipelineCacheState::Initialize, "PipelineCache_initialize"),
        (PipelineCacheState::LoadFromDisk, "PipelineCache_load_from_disk"),
        (PipelineCacheState::Ready, "PipelineCache_ready"),
        (PipelineCacheState::SaveToDisk, "PipelineCache_save_to_disk"),
    ];

    #[inline]
    fn state(self) -> StateType {
        self as StateType
    }
}

/// The cache blob shared between the cache task and its factory.
pub type CacheBlob = Arc<Mutex<Vec<u8>>>;

/// Loads the cache of one factory, hands it over, and saves it afterwards.
pub struct PipelineCache {
    path: Option<PathBuf>,
    blob: CacheBlob,
    owner: Weak<Task>,
    ready_condition: Condition,
    load_attempts: u32,
}

impl PipelineCache {
    /// `path` of `None` keeps the cache in memory only. Once loaded, `owner`
    /// receives `signal(ready_condition)`.
    pub fn new(
        path: Option<PathBuf>,
        blob: CacheBlob,
        owner: &Arc<Task>,
        ready_condition: Condition,
    ) -> Self {
        Self {
            path,
            blob,
            owner: Arc::downgrade(owner),
            ready_condition,
            load_attempts: 0,
        }
    }
}

impl StateMachine for PipelineCache {
    fn task_name(&self) -> &'static str {
        PipelineCacheState::LAYER
    }

    fn state_name(
        &self,
        state: StateType,
    ) -> &'static str {
        PipelineCacheState::name_of(state).unwrap_or("<unknown>")
    }

    fn initial_state(&self) -> StateType {
        PipelineCacheState::Initialize.state()
    }

    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        let Some(state) = PipelineCacheState::from_state(state) else {
            panic!("PipelineCache: unknown state {}", state);
        };
        match state {
            PipelineCacheState::Initialize => {
                self.blob.lock().clear();
                let on_disk = self.path.as_deref().is_some_and(Path::exists);
                let next = if on_disk && self.load_attempts < 2 {
                    PipelineCacheState::LoadFromDisk
                } else {
                    PipelineCacheState::Ready
                };
                ctx.set_state(next.state());
            }
            PipelineCacheState::LoadFromDisk => {
                self.load_attempts += 1;
                let Some(path) = self.path.as_deref() else {
                    ctx.set_state(PipelineCacheState::Ready.state());
                    return Ok(());
                };
                match read_cache_file(path) {
                    Ok(data) => {
                        info!(path = %path.display(), bytes = data.len(), "pipeline cache loaded");
                        *self.blob.lock() = data;
                        ctx.set_state(PipelineCacheState::Ready.state());
                    }
                    Err(err) => {
                        warn!("{}; deleting it", err);
                        if let Err(e) = fs::remove_file(path) {
                            warn!(path = %path.display(), "failed to delete pipeline cache: {}", e);
                        }
                        ctx.set_state(PipelineCacheState::Initialize.state());
                    }
                }
            }
            PipelineCacheState::Ready => {
                match self.owner.upgrade() {
                    Some(owner) => owner.signal(self.ready_condition),
                    None => debug!("pipeline cache owner is gone"),
                }
                ctx.set_state(PipelineCacheState::SaveToDisk.state());
                ctx.wait(FACTORY_FINISHED);
            }
            PipelineCacheState::SaveToDisk => {
                if let Some(path) = self.path.as_deref() {
                    let blob = self.blob.lock().clone();
                    if !blob.is_empty() {
                        write_cache_file(path, &blob)?;
                        info!(path = %path.display(), bytes = blob.len(), "pipeline cache saved");
                    }
                }
                ctx.finish();
            }
        }
        Ok(())
    }
}
