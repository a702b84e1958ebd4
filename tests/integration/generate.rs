//! 通过公共 API 生成管线

use std::collections::BTreeSet;

use taskforge::pipeline::cache::{cache_path, read_cache_file};
use taskforge::util::config::{load_config_from, save_config_to, Config, SchedulerConfig};
use taskforge::{generate, inspect_cache, NAME};

fn manual_config(cache_dir: Option<&std::path::Path>) -> Config {
    let mut config = Config {
        scheduler: SchedulerConfig::manual(),
        ..Config::default()
    };
    match cache_dir {
        Some(dir) => config.cache.dir = Some(dir.to_path_buf()),
        None => config.cache.enabled = false,
    }
    config
}

#[test]
fn test_generate_every_combination() {
    let pipelines = generate(&manual_config(None), &[2, 3, 2]).unwrap();
    assert_eq!(pipelines.len(), 12);

    let combinations: BTreeSet<(String, String, String)> = pipelines
        .iter()
        .map(|p| (p.defines["AXIS0"].clone(), p.defines["AXIS1"].clone(), p.defines["AXIS2"].clone()))
        .collect();
    assert_eq!(combinations.len(), 12);

    let indices: BTreeSet<u64> = pipelines.iter().map(|p| p.index.inner()).collect();
    assert_eq!(indices.len(), 12);
    // 1 + 2 + 1 bits
    assert!(indices.iter().all(|&index| index < 16));
}

#[test]
fn test_generate_rejects_empty_axis() {
    let err = generate(&manual_config(None), &[2, 0]).unwrap_err();
    assert!(err.to_string().contains("invalid range"));
}

#[test]
fn test_generate_writes_inspectable_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = manual_config(Some(dir.path()));
    assert_eq!(generate(&config, &[4]).unwrap().len(), 4);

    let path = cache_path(dir.path(), NAME);
    assert_eq!(read_cache_file(&path).unwrap().len(), 32);
    assert_eq!(inspect_cache(&path).unwrap(), 32);

    // A second run hits the cache and leaves it as it was.
    assert_eq!(generate(&config, &[4]).unwrap().len(), 4);
    assert_eq!(inspect_cache(&path).unwrap(), 32);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let mut config = manual_config(Some(dir.path()));
    config.scheduler.max_queue_size = 3;
    save_config_to(&config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.scheduler.max_queue_size, 3);
    assert_eq!(loaded.scheduler.normal_priority_workers, 0);
    assert_eq!(loaded.cache.dir.as_deref(), Some(dir.path()));
}
