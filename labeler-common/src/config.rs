//! Bootstrap configuration loading
//!
//! Settings are resolved in this priority order:
//! 1. Command-line argument (applied by the binary on top of the loaded file)
//! 2. Environment variable (also applied by the binary, via clap `env`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error: the compiled defaults are used. A
//! malformed file is an error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "LABELER_CONFIG";

/// File name of the persisted session inside `annotations_dir`
pub const SNAPSHOT_FILE_NAME: &str = "annotations.json";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change while the service runs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Flat directory holding the images to annotate
    #[serde(default = "default_image_directory")]
    pub image_directory: PathBuf,

    /// Directory holding the session snapshot
    #[serde(default = "default_annotations_dir")]
    pub annotations_dir: PathBuf,

    /// Base URL of the training service
    #[serde(default = "default_trainer_url")]
    pub trainer_url: String,

    /// Address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Fraction of discovered images held out for evaluation
    #[serde(default = "default_test_set_fraction")]
    pub test_set_fraction: f64,

    /// Number of training annotations buffered before a flush
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Seed for the one-time shuffle (random when absent)
    #[serde(default)]
    pub shuffle_seed: Option<u64>,

    /// Fixed backoff between `init_training` attempts
    #[serde(default = "default_init_retry_interval_ms")]
    pub init_retry_interval_ms: u64,

    /// Give up on `init_training` after this long (retry forever when absent)
    #[serde(default)]
    pub init_max_wait_secs: Option<u64>,

    /// Per-request timeout for deliveries to the trainer
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long shutdown waits for queued deliveries
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_image_directory() -> PathBuf {
    PathBuf::from("./images")
}

fn default_annotations_dir() -> PathBuf {
    PathBuf::from("./annotations")
}

fn default_trainer_url() -> String {
    "http://127.0.0.1:3333".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:3334".to_string()
}

fn default_test_set_fraction() -> f64 {
    0.2
}

fn default_buffer_size() -> usize {
    10
}

fn default_init_retry_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_drain_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            image_directory: default_image_directory(),
            annotations_dir: default_annotations_dir(),
            trainer_url: default_trainer_url(),
            bind_address: default_bind_address(),
            test_set_fraction: default_test_set_fraction(),
            buffer_size: default_buffer_size(),
            shuffle_seed: None,
            init_retry_interval_ms: default_init_retry_interval_ms(),
            init_max_wait_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_drain_secs: default_shutdown_drain_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the config file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path` if given and present, otherwise fall back to defaults.
    ///
    /// Runs before logging is initialised, so the caller reports which
    /// source was used.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.test_set_fraction) {
            return Err(Error::Config(format!(
                "test_set_fraction must be within [0, 1], got {}",
                self.test_set_fraction
            )));
        }
        if self.trainer_url.trim().is_empty() {
            return Err(Error::Config("trainer_url must not be empty".to_string()));
        }
        Ok(())
    }

    /// Location of the persisted session
    pub fn snapshot_path(&self) -> PathBuf {
        self.annotations_dir.join(SNAPSHOT_FILE_NAME)
    }
}

/// Pick the config file to read.
///
/// Explicit argument first, then `LABELER_CONFIG`, then the per-user file
/// (`~/.config/labeler/config.toml` on Linux) if it exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("labeler").join("config.toml"))
        .filter(|p| p.exists())
}
