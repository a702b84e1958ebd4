//! 管线缓存文件与缓存任务测试

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::pipeline::cache::{
    cache_path, decode_blob, encode_blob, read_cache_file, write_cache_file, CacheBlob, PipelineCache,
    FACTORY_FINISHED,
};
use crate::pipeline::error::PipelineError;
use crate::runtime::scheduler::{Engine, StateMachine, StateType, Task, TaskContext};

const READY: u32 = 0x1;

/// Waits for the cache to become ready, then finishes.
struct Owner;

impl StateMachine for Owner {
    fn task_name(&self) -> &'static str {
        "Owner"
    }

    fn state_name(
        &self,
        state: StateType,
    ) -> &'static str {
        if state == 0 {
            "Owner_wait"
        } else {
            "Owner_done"
        }
    }

    fn initial_state(&self) -> StateType {
        0
    }

    fn multiplex(
        &mut self,
        state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        if state == 0 {
            ctx.set_state(1);
            ctx.wait(READY);
        } else {
            ctx.finish();
        }
        Ok(())
    }
}

fn drain(engine: &Arc<Engine>) {
    while engine.has_runnable() {
        engine.step_all(None);
    }
}

/// Runs a cache task for `path` and returns it with its owner and blob.
fn start_cache(
    engine: &Arc<Engine>,
    path: Option<PathBuf>,
) -> (Arc<Task>, Arc<Task>, CacheBlob) {
    let blob = CacheBlob::default();
    let owner = Task::create(Owner);
    owner.run(engine).unwrap();
    let cache = Task::create(PipelineCache::new(path, blob.clone(), &owner, READY));
    cache.run(engine).unwrap();
    drain(engine);
    (owner, cache, blob)
}

#[test]
fn test_blob_encoding() {
    let encoded = encode_blob(b"abc");
    assert_eq!(&encoded[..8], &3u64.to_le_bytes());
    assert_eq!(&encoded[8..], b"abc");
    assert_eq!(decode_blob(Path::new("x"), &encoded).unwrap(), b"abc");
    assert_eq!(decode_blob(Path::new("x"), &encode_blob(&[])).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_corrupted_blobs_are_rejected() {
    let short = decode_blob(Path::new("c"), &[1, 2, 3]).unwrap_err();
    assert!(matches!(short, PipelineError::CacheCorrupted { .. }));
    assert!(short.to_string().contains("shorter than its size field"));

    let mut long = encode_blob(b"abc");
    long.push(0);
    let err = decode_blob(Path::new("c"), &long).unwrap_err();
    assert!(err.to_string().contains("size field says 3 bytes but 4 follow"));
}

#[test]
fn test_cache_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = cache_path(dir.path(), "factory");
    assert!(path.ends_with("factory/pipeline_cache"));

    write_cache_file(&path, b"pipelines").unwrap();
    assert_eq!(read_cache_file(&path).unwrap(), b"pipelines");
    write_cache_file(&path, b"more").unwrap();
    assert_eq!(read_cache_file(&path).unwrap(), b"more");

    let missing = read_cache_file(&dir.path().join("missing")).unwrap_err();
    assert!(matches!(missing, PipelineError::Io { .. }));
}

#[test]
fn test_cache_task_saves_after_factory_finished() {
    let dir = tempfile::tempdir().unwrap();
    let path = cache_path(dir.path(), "saved");
    let engine = Engine::new("cache");

    let (owner, cache, blob) = start_cache(&engine, Some(path.clone()));
    assert!(owner.is_finished());
    assert!(!cache.is_terminal());
    assert!(!path.exists());

    blob.lock().extend_from_slice(&[1, 2, 3, 4]);
    cache.signal(FACTORY_FINISHED);
    drain(&engine);
    assert!(cache.is_finished());
    assert_eq!(read_cache_file(&path).unwrap(), vec![1, 2, 3, 4]);

    // A second run picks the file up.
    let (owner, _cache, blob) = start_cache(&engine, Some(path));
    assert!(owner.is_finished());
    assert_eq!(*blob.lock(), vec![1, 2, 3, 4]);
}

#[test]
fn test_cache_task_deletes_corrupted_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = cache_path(dir.path(), "broken");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, [9, 9, 9]).unwrap();
    let engine = Engine::new("cache");

    let (owner, cache, blob) = start_cache(&engine, Some(path.clone()));
    assert!(owner.is_finished());
    assert!(blob.lock().is_empty());
    assert!(!path.exists());

    cache.signal(FACTORY_FINISHED);
    drain(&engine);
    assert!(cache.is_finished());
    assert!(!path.exists());
}

#[test]
fn test_in_memory_cache_never_touches_disk() {
    let engine = Engine::new("cache");
    let (owner, cache, blob) = start_cache(&engine, None);
    assert!(owner.is_finished());
    blob.lock().push(1);
    cache.signal(FACTORY_FINISHED);
    drain(&engine);
    assert!(cache.is_finished());
}
