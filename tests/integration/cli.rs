//! 命令行测试

use std::path::Path;
use std::process::{Command, Output};

use taskforge::pipeline::cache::write_cache_file;

fn taskforge(
    config: &Path,
    args: &[&str],
) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskforge"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run taskforge")
}

fn config_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, "[scheduler]\nnormal_priority_workers = 1\n\n[log]\nlevel = \"warn\"\n").unwrap();
    path
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = taskforge(&config_file(dir.path()), &["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("taskforge {}", taskforge::VERSION));
}

#[test]
fn test_generate_prints_pipelines() {
    let dir = tempfile::tempdir().unwrap();
    let output = taskforge(&config_file(dir.path()), &["generate", "--axis", "2", "--axis", "2", "--no-cache"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("AXIS0=1 AXIS1=0"));
    assert_eq!(stdout.lines().last(), Some("4 pipelines"));
}

#[test]
fn test_inspect_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path());
    let good = dir.path().join("good");
    write_cache_file(&good, &[0; 24]).unwrap();
    let output = taskforge(&config, &["inspect-cache", good.to_str().unwrap()]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("24 bytes"));

    let bad = dir.path().join("bad");
    std::fs::write(&bad, [1, 2]).unwrap();
    let output = taskforge(&config, &["inspect-cache", bad.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid pipeline cache"));
}

#[test]
fn test_generate_needs_an_axis() {
    let dir = tempfile::tempdir().unwrap();
    let output = taskforge(&config_file(dir.path()), &["generate"]);
    assert!(!output.status.success());
}
