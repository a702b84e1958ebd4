//! taskforge configuration
//!
//! # Configuration lookup
//!
//! ```text
//! Priority (high → low):
//! 1. Explicit path (--config)
//! 2. $XDG_CONFIG_HOME/taskforge/config.toml
//! 3. ~/.config/taskforge/config.toml
//! 4. Default values
//! ```
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! normal_priority_workers = 4
//! max_duration_ms = 2
//!
//! [cache]
//! dir = "/tmp/taskforge"
//!
//! [log]
//! level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::runtime::scheduler::{EngineConfig, Priority};
use crate::util::logger::LogLevel;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Engine and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Workers of the low priority engine (0 = driven by hand)
    #[serde(default = "default_one")]
    pub low_priority_workers: usize,
    #[serde(default = "default_normal_workers")]
    pub normal_priority_workers: usize,
    #[serde(default = "default_one")]
    pub high_priority_workers: usize,
    /// Time budget of one engine pass in milliseconds (0 = unbounded)
    #[serde(default)]
    pub max_duration_ms: u64,
    /// Admission limit per engine (0 = unbounded)
    #[serde(default)]
    pub max_queue_size: usize,
    /// How long an idle worker parks, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// How long a full engine is retried while none of its tasks end, in milliseconds
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,
}

fn default_one() -> usize {
    1
}

fn default_normal_workers() -> usize {
    2
}

fn default_idle_timeout_ms() -> u64 {
    10
}

fn default_admission_timeout_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            low_priority_workers: 1,
            normal_priority_workers: 2,
            high_priority_workers: 1,
            max_duration_ms: 0,
            max_queue_size: 0,
            idle_timeout_ms: 10,
            admission_timeout_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    /// No worker threads; every engine is stepped by hand.
    pub fn manual() -> Self {
        Self {
            low_priority_workers: 0,
            normal_priority_workers: 0,
            high_priority_workers: 0,
            ..Self::default()
        }
    }

    pub fn workers(
        &self,
        priority: Priority,
    ) -> usize {
        match priority {
            Priority::Low => self.low_priority_workers,
            Priority::Normal => self.normal_priority_workers,
            Priority::High => self.high_priority_workers,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_duration: (self.max_duration_ms > 0).then(|| Duration::from_millis(self.max_duration_ms)),
            max_queue_size: self.max_queue_size,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms.max(1)),
            admission_timeout: Duration::from_millis(self.admission_timeout_ms),
        }
    }
}

/// Pipeline cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory; defaults to ~/.cache/taskforge
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// The directory pipeline caches are kept in, if caching is enabled.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        if let Some(dir) = &self.dir {
            return Some(dir.clone());
        }
        if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
            return Some(PathBuf::from(xdg_cache).join("taskforge"));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".cache").join("taskforge"))
    }
}

/// Log settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("taskforge"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("taskforge"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("taskforge"));
    }

    None
}

/// Get the user config file path (~/.config/taskforge/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load the user configuration, or defaults if there is none
pub fn load_config() -> Result<Config, ConfigError> {
    match get_config_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Ok(Config::default()),
    }
}

/// Load configuration from an explicit file
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Save configuration, creating the parent directory if needed
pub fn save_config_to(
    config: &Config,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Save to the user config path
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = get_config_path().ok_or(ConfigError::NoConfigDir)?;
    save_config_to(config, &path)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Cannot determine config directory")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.normal_priority_workers, 2);
        assert_eq!(config.scheduler.max_queue_size, 0);
        assert!(config.cache.enabled);
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            max_queue_size = 8
            max_duration_ms = 3

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_queue_size, 8);
        assert_eq!(config.scheduler.high_priority_workers, 1);
        assert_eq!(config.log.level, LogLevel::Debug);

        let engine = config.scheduler.engine_config();
        assert_eq!(engine.max_duration, Some(Duration::from_millis(3)));
        assert_eq!(engine.max_queue_size, 8);
        assert_eq!(engine.admission_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.scheduler = SchedulerConfig::manual();
        config.cache.dir = Some(PathBuf::from("/var/cache/tf"));
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.scheduler.normal_priority_workers, 0);
        assert_eq!(loaded.cache.dir, Some(PathBuf::from("/var/cache/tf")));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scheduler\nmax_queue_size = ").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_cache_disabled() {
        let cache = CacheConfig {
            dir: Some(PathBuf::from("/tmp/x")),
            enabled: false,
        };
        assert_eq!(cache.resolve_dir(), None);
    }
}
