//! # OnAir Configuration Module
//!
//! This module provides configuration management for OnAir, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Change subscriptions on configuration paths
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use onairconfig::get_config;
//!
//! let config = get_config();
//!
//! // Watch the stream URL
//! let _sub = config.on_change(&["radio", "stream_url"], |value| {
//!     println!("stream url is now {:?}", value);
//! });
//!
//! config.set_value(
//!     &["radio", "stream_url"],
//!     serde_yaml::Value::String("https://stream.example/live".into()),
//! )?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info, warn};

mod watch;

pub use watch::{ChangeCallback, ConfigSubscription};
use watch::WatcherRegistry;

const DEFAULT_CONFIG: &str = include_str!("onair.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load OnAir configuration"));
}

const ENV_CONFIG_DIR: &str = "ONAIR_CONFIG";
const ENV_PREFIX: &str = "ONAIR_CONFIG__";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for OnAir
///
/// Values live in a YAML tree. Writes go through [`Config::set_value`], which
/// persists the tree (unless the configuration is in-memory) and notifies
/// the subscribers registered with [`Config::on_change`].
pub struct Config {
    config_dir: String,
    path: Option<PathBuf>,
    data: Mutex<Value>,
    watchers: Arc<WatcherRegistry>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("config_dir", &self.config_dir)
            .field("path", &self.path)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

// Clones share nothing: a fresh tree copy and no subscribers.
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.lock_data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
            watchers: Arc::new(WatcherRegistry::default()),
        }
    }
}

impl Config {
    fn lock_data(&self) -> MutexGuard<'_, Value> {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".onair").exists() {
            return ".onair".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".onair");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".onair".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `ONAIR_CONFIG` environment variable
    /// 3. `.onair` in the current directory
    /// 4. `.onair` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for
    /// read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// The embedded defaults are merged with `config.yaml` from the
    /// configuration directory (when present), then `ONAIR_CONFIG__*`
    /// environment overrides are applied and the merged tree is written back.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir).join("config.yaml");

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut default_value, &Self::lower_keys_value(external_value));
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
        }

        let mut config_value = Self::lower_keys_value(default_value);
        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path: Some(path),
            data: Mutex::new(config_value),
            watchers: Arc::new(WatcherRegistry::default()),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds a configuration that never touches the disk.
    ///
    /// `overrides` is merged over the embedded defaults. Environment
    /// overrides are not applied.
    pub fn in_memory(overrides: &str) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !overrides.trim().is_empty() {
            let external: Value = serde_yaml::from_str(overrides)?;
            merge_yaml(&mut value, &Self::lower_keys_value(external));
        }
        Ok(Config {
            config_dir: String::new(),
            path: None,
            data: Mutex::new(Self::lower_keys_value(value)),
            watchers: Arc::new(WatcherRegistry::default()),
        })
    }

    /// Directory holding `config.yaml` (empty for in-memory configurations).
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = {
            let data = self.lock_data();
            serde_yaml::to_string(&*data)?
        };
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path, saves it and
    /// notifies the subscribers whose path overlaps `path`.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock_data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()?;
        self.notify(path);
        Ok(())
    }

    fn notify(&self, path: &[&str]) {
        let changed: Vec<String> = path.iter().map(|k| k.to_lowercase()).collect();
        let affected = self.watchers.affected(&changed);
        if affected.is_empty() {
            return;
        }

        debug!(path = %changed.join("."), subscribers = affected.len(), "Notifying configuration change");
        for (watched, callback) in affected {
            let keys: Vec<&str> = watched.iter().map(String::as_str).collect();
            let current = self.get_value(&keys).unwrap_or(Value::Null);
            callback(&current);
        }
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                if !entry.is_mapping() {
                    *entry = Value::Mapping(Mapping::new());
                }
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Registers `callback` for changes at `path`.
    ///
    /// The callback runs synchronously on the writer's thread, after the
    /// write has been applied and persisted. Keep it short.
    pub fn on_change<F>(&self, path: &[&str], callback: F) -> ConfigSubscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let path = path.iter().map(|k| k.to_lowercase()).collect();
        self.watchers.add(path, Arc::new(callback))
    }

    /// Number of live change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.watchers.len()
    }

    /// Reads an unsigned integer, falling back to `default` when the path is
    /// missing or holds something else.
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path.join("."), value = %s, "Invalid integer, using default {}", default);
                default
            }),
            _ => default,
        }
    }

    pub fn set_u64(&self, path: &[&str], value: u64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    /// Reads a float, falling back to `default` when the path is missing or
    /// holds something else.
    pub fn get_f64_or(&self, path: &[&str], default: f64) -> f64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path.join("."), value = %s, "Invalid number, using default {}", default);
                default
            }),
            _ => default,
        }
    }

    pub fn set_f64(&self, path: &[&str], value: f64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    /// Reads a string, falling back to `default` when the path is missing or
    /// is not a string.
    pub fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var = %key, "Ignoring environment override: {}", err);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Minimum log level for the console logger (`TRACE` … `ERROR`).
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration instance
///
/// The instance is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_in_memory_defaults() {
        let config = Config::in_memory("").unwrap();
        assert_eq!(config.get_u64_or(&["player", "retry_ceiling"], 0), 10);
        assert_eq!(
            config.get_value(&["radio", "stream_url"]).unwrap(),
            Value::String(String::new())
        );
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
    }

    #[test]
    fn test_in_memory_overrides_are_merged() {
        let config = Config::in_memory("player:\n  Retry_Ceiling: 4\n").unwrap();
        assert_eq!(config.get_u64_or(&["player", "retry_ceiling"], 0), 4);
        // Untouched siblings keep their defaults
        assert_eq!(config.get_u64_or(&["player", "reconnect_delay_ms"], 0), 3000);
    }

    #[test]
    fn test_typed_getters_fallback() {
        let config = Config::in_memory("player:\n  start_timeout_ms: soon\n").unwrap();
        assert_eq!(config.get_u64_or(&["player", "start_timeout_ms"], 7), 7);
        assert_eq!(config.get_u64_or(&["player", "missing"], 9), 9);
        assert_eq!(config.get_f64_or(&["player", "backoff_multiplier"], 0.0), 1.0);
        assert_eq!(config.get_string_or(&["nope"], "dflt"), "dflt");
    }

    #[test]
    fn test_on_change_notifies_overlapping_paths() {
        let config = Config::in_memory("").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let hits_cb = Arc::clone(&hits);
        let seen_cb = Arc::clone(&seen);
        let _sub = config.on_change(&["radio", "stream_url"], move |value| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
            seen_cb.lock().unwrap().push(value.clone());
        });

        config
            .set_value(&["radio", "stream_url"], Value::String("http://a".into()))
            .unwrap();
        config.set_u64(&["player", "retry_ceiling"], 3).unwrap();

        let mut replaced = Mapping::new();
        replaced.insert(Value::String("stream_url".into()), Value::String("http://b".into()));
        config.set_value(&["radio"], Value::Mapping(replaced)).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Value::String("http://a".into()));
        assert_eq!(seen[1], Value::String("http://b".into()));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let config = Config::in_memory("").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        let sub = config.on_change(&["radio"], move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(config.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(config.subscriber_count(), 0);

        config
            .set_value(&["radio", "stream_url"], Value::String("http://a".into()))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_config_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        fs::write(
            dir.path().join("config.yaml"),
            "radio:\n  stream_url: https://stream.example/live\n",
        )
        .unwrap();

        let config = Config::load_config(dir_str).unwrap();
        assert_eq!(
            config.get_value(&["radio", "stream_url"]).unwrap(),
            Value::String("https://stream.example/live".into())
        );

        config.set_u64(&["player", "retry_ceiling"], 5).unwrap();
        let reloaded = Config::load_config(dir_str).unwrap();
        assert_eq!(reloaded.get_u64_or(&["player", "retry_ceiling"], 0), 5);
    }

    #[test]
    fn test_clone_does_not_share_subscribers() {
        let config = Config::in_memory("").unwrap();
        let _sub = config.on_change(&["radio"], |_| {});
        let cloned = config.clone();
        assert_eq!(config.subscriber_count(), 1);
        assert_eq!(cloned.subscriber_count(), 0);
    }
}
