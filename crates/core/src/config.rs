//! Pipeline configuration
//!
//! Settings can be loaded from a TOML file, overridden by environment
//! variables, and swapped at runtime through [`SharedConfig`].

use std::env::{self, VarError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::upscale::UpscaleConditions;

const MB: usize = 1024 * 1024;

/// Default load concurrency
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default page cache budget (512MB)
pub const DEFAULT_CACHE_BUDGET_BYTES: usize = 512 * MB;
pub const DEFAULT_THUMBNAIL_CAPACITY: usize = 100;
pub const DEFAULT_THUMBNAIL_MAX_EDGE: u32 = 256;

/// Upscale results older than this are recomputed (30 days)
pub const DEFAULT_UPSCALE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Environment variable names
pub const ENV_CONCURRENCY: &str = "PAGEFLOW_CONCURRENCY";
pub const ENV_CACHE_MB: &str = "PAGEFLOW_CACHE_MB";
pub const ENV_PRELOAD_SIZE: &str = "PAGEFLOW_PRELOAD_SIZE";
pub const ENV_FORWARD_RATIO: &str = "PAGEFLOW_FORWARD_RATIO";
pub const ENV_DOUBLE_PAGE: &str = "PAGEFLOW_DOUBLE_PAGE";
pub const ENV_UPSCALE: &str = "PAGEFLOW_UPSCALE";
pub const ENV_UPSCALE_CACHE_DIR: &str = "PAGEFLOW_UPSCALE_CACHE_DIR";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config file: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Upscale worker and cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpscaleSettings {
    /// Number of upscale worker threads
    pub workers: usize,

    /// Delay before a job the engine reported busy is retried
    pub busy_backoff_ms: u64,

    /// Maximum age of a stored result before it is recomputed
    pub cache_max_age_secs: u64,

    /// Number of upscaled pages kept in memory
    pub memory_results: usize,

    /// Directory of the on-disk result store
    pub cache_dir: PathBuf,

    pub conditions: UpscaleConditions,
}

impl Default for UpscaleSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            busy_backoff_ms: 1000,
            cache_max_age_secs: DEFAULT_UPSCALE_MAX_AGE_SECS,
            memory_results: 32,
            cache_dir: PipelineConfig::default_upscale_cache_dir(),
            conditions: UpscaleConditions::default(),
        }
    }
}

/// Settings for the whole page pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of page loads in flight
    pub concurrency: usize,

    /// Byte budget of the page cache
    pub cache_budget_bytes: usize,

    /// Pages in the normal preload ring
    pub preload_size: usize,

    /// Share of the preload ring placed ahead of the reader
    pub forward_ratio: f64,

    /// Show two pages side by side
    pub double_page: bool,

    pub upscale_enabled: bool,

    pub thumbnail_capacity: usize,
    pub thumbnail_max_edge: u32,

    pub upscale: UpscaleSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            preload_size: pageflow_scheduler::preload::DEFAULT_PRELOAD_SIZE,
            forward_ratio: pageflow_scheduler::preload::DEFAULT_FORWARD_RATIO,
            double_page: false,
            upscale_enabled: false,
            thumbnail_capacity: DEFAULT_THUMBNAIL_CAPACITY,
            thumbnail_max_edge: DEFAULT_THUMBNAIL_MAX_EDGE,
            upscale: UpscaleSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Builder method to set load concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set the cache budget in megabytes
    pub fn with_cache_budget_mb(mut self, megabytes: usize) -> Self {
        self.cache_budget_bytes = megabytes.saturating_mul(MB);
        self
    }

    pub fn with_preload(mut self, preload_size: usize, forward_ratio: f64) -> Self {
        self.preload_size = preload_size;
        self.forward_ratio = forward_ratio;
        self
    }

    pub fn with_double_page(mut self, double_page: bool) -> Self {
        self.double_page = double_page;
        self
    }

    pub fn with_upscale_enabled(mut self, enabled: bool) -> Self {
        self.upscale_enabled = enabled;
        self
    }

    pub fn with_upscale_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.upscale.cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Cache budget in megabytes, rounded down
    pub fn cache_budget_mb(&self) -> usize {
        self.cache_budget_bytes / MB
    }

    /// Platform cache directory for upscale results
    pub fn default_upscale_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("pageflow").join("upscale"))
            .unwrap_or_else(|| PathBuf::from(".pageflow-cache").join("upscale"))
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Defaults overridden by environment variables
    ///
    /// - `PAGEFLOW_CONCURRENCY`: load concurrency
    /// - `PAGEFLOW_CACHE_MB`: page cache budget in MB
    /// - `PAGEFLOW_PRELOAD_SIZE`: pages in the preload ring
    /// - `PAGEFLOW_FORWARD_RATIO`: forward share, 0.0 to 1.0
    /// - `PAGEFLOW_DOUBLE_PAGE`: `1`/`true`/`yes`/`on` or `0`/`false`/`no`/`off`
    /// - `PAGEFLOW_UPSCALE`: same boolean forms
    /// - `PAGEFLOW_UPSCALE_CACHE_DIR`: result store directory
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables, then validate
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(concurrency) = env_value(ENV_CONCURRENCY)? {
            self.concurrency = concurrency;
        }
        if let Some(megabytes) = env_value::<usize>(ENV_CACHE_MB)? {
            self.cache_budget_bytes = megabytes.saturating_mul(MB);
        }
        if let Some(preload_size) = env_value(ENV_PRELOAD_SIZE)? {
            self.preload_size = preload_size;
        }
        if let Some(ratio) = env_value(ENV_FORWARD_RATIO)? {
            self.forward_ratio = ratio;
        }
        if let Some(double_page) = env_flag(ENV_DOUBLE_PAGE)? {
            self.double_page = double_page;
        }
        if let Some(enabled) = env_flag(ENV_UPSCALE)? {
            self.upscale_enabled = enabled;
        }
        if let Some(dir) = env_value::<String>(ENV_UPSCALE_CACHE_DIR)? {
            self.upscale.cache_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.cache_budget_bytes == 0 {
            return Err(ConfigError::invalid("cache_budget_bytes", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.forward_ratio) {
            return Err(ConfigError::invalid(
                "forward_ratio",
                format!("{} is outside 0.0..=1.0", self.forward_ratio),
            ));
        }
        if self.thumbnail_capacity == 0 {
            return Err(ConfigError::invalid("thumbnail_capacity", "must be at least 1"));
        }
        if self.thumbnail_max_edge == 0 {
            return Err(ConfigError::invalid("thumbnail_max_edge", "must be at least 1"));
        }
        if self.upscale.workers == 0 {
            return Err(ConfigError::invalid("upscale.workers", "must be at least 1"));
        }
        if self.upscale.memory_results == 0 {
            return Err(ConfigError::invalid(
                "upscale.memory_results",
                "must be at least 1",
            ));
        }
        for rule in &self.upscale.conditions.rules {
            rule.check().map_err(|reason| {
                ConfigError::invalid(&format!("upscale.conditions.rules[{}]", rule.id), reason)
            })?;
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("cannot parse {raw:?}"))),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::invalid(key, "not valid unicode")),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = env_value::<String>(key)? else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(key, format!("expected a boolean, got {raw:?}"))),
    }
}

/// Configuration shared between the session and its components.
///
/// Readers take a snapshot; a replacement is visible to every clone.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<PipelineConfig>>,
}

impl SharedConfig {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> PipelineConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read a single value without cloning the whole configuration
    pub fn read<R>(&self, f: impl FnOnce(&PipelineConfig) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, config: PipelineConfig) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upscale::UpscaleCondition;
    use serial_test::serial;

    const ALL_VARS: [&str; 7] = [
        ENV_CONCURRENCY,
        ENV_CACHE_MB,
        ENV_PRELOAD_SIZE,
        ENV_FORWARD_RATIO,
        ENV_DOUBLE_PAGE,
        ENV_UPSCALE,
        ENV_UPSCALE_CACHE_DIR,
    ];

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.cache_budget_mb(), 512);
        assert_eq!(config.preload_size, 10);
        assert!((config.forward_ratio - 0.7).abs() < f64::EPSILON);
        assert!(!config.double_page);
        assert!(!config.upscale_enabled);
        assert_eq!(config.upscale.workers, 1);
        assert_eq!(config.upscale.busy_backoff_ms, 1000);
        assert_eq!(config.upscale.cache_max_age_secs, 30 * 24 * 60 * 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::default()
            .with_concurrency(2)
            .with_cache_budget_mb(64)
            .with_preload(6, 0.5)
            .with_double_page(true)
            .with_upscale_enabled(true)
            .with_upscale_cache_dir("/tmp/pageflow-test");

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.cache_budget_bytes, 64 * MB);
        assert_eq!(config.preload_size, 6);
        assert!(config.double_page);
        assert!(config.upscale_enabled);
        assert_eq!(config.upscale.cache_dir, PathBuf::from("/tmp/pageflow-test"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            concurrency = 8
            double_page = true

            [upscale]
            workers = 2

            [upscale.conditions]
            enabled = true

            [[upscale.conditions.rules]]
            id = "small"
            max_width = 1200
            model = "photo"
            scale = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert!(config.double_page);
        assert_eq!(config.preload_size, 10);
        assert_eq!(config.upscale.workers, 2);
        assert_eq!(config.upscale.memory_results, 32);
        assert!(config.upscale.conditions.enabled);
        assert_eq!(config.upscale.conditions.rules.len(), 1);
        assert_eq!(config.upscale.conditions.rules[0].scale, 4);
        assert!(config.upscale.conditions.rules[0].enabled);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = PipelineConfig::from_toml_str("concurency = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = PipelineConfig::from_toml_str("forward_ratio = 1.5").unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref key, .. } if key == "forward_ratio"),
            "{err}"
        );

        let config = PipelineConfig::default().with_concurrency(0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.upscale.conditions.rules.push(UpscaleCondition {
            id: "inverted".into(),
            min_width: 10,
            max_width: 5,
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pageflow.toml");
        let config = PipelineConfig::default()
            .with_concurrency(3)
            .with_double_page(true)
            .with_upscale_cache_dir(dir.path().join("upscale"));

        config.save_to_file(&path).unwrap();
        let loaded = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PipelineConfig::from_file("/nonexistent/pageflow.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_CONCURRENCY, "6");
        env::set_var(ENV_CACHE_MB, "128");
        env::set_var(ENV_PRELOAD_SIZE, "4");
        env::set_var(ENV_FORWARD_RATIO, "0.5");
        env::set_var(ENV_DOUBLE_PAGE, "yes");
        env::set_var(ENV_UPSCALE, "1");
        env::set_var(ENV_UPSCALE_CACHE_DIR, "/tmp/pageflow-env");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.cache_budget_bytes, 128 * MB);
        assert_eq!(config.preload_size, 4);
        assert!((config.forward_ratio - 0.5).abs() < f64::EPSILON);
        assert!(config.double_page);
        assert!(config.upscale_enabled);
        assert_eq!(config.upscale.cache_dir, PathBuf::from("/tmp/pageflow-env"));
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for var in ALL_VARS {
            env::remove_var(var);
        }
        env::set_var(ENV_CONCURRENCY, "2");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.cache_budget_bytes, DEFAULT_CACHE_BUDGET_BYTES);
        assert!(!config.upscale_enabled);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for var in ALL_VARS {
            env::remove_var(var);
        }

        env::set_var(ENV_CONCURRENCY, "many");
        assert!(PipelineConfig::from_env().is_err());
        env::remove_var(ENV_CONCURRENCY);

        env::set_var(ENV_DOUBLE_PAGE, "sometimes");
        assert!(PipelineConfig::from_env().is_err());
        env::remove_var(ENV_DOUBLE_PAGE);

        env::set_var(ENV_FORWARD_RATIO, "2.0");
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_shared_config_replace_is_visible_to_clones() {
        let shared = SharedConfig::new(PipelineConfig::default());
        let other = shared.clone();
        shared.replace(PipelineConfig::default().with_concurrency(9));
        assert_eq!(other.snapshot().concurrency, 9);
        assert_eq!(other.read(|config| config.preload_size), 10);
    }

    /// Restores environment variables on drop
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let saved = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(value) => env::set_var(name, value),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
