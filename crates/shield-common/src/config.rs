use miette::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ShieldError;

pub const DEFAULT_BASE_URL: &str = "https://api.nenna.ai/latest";

/// Prefix of every environment variable read by [`ShieldConfig::apply_env`].
pub const ENV_PREFIX: &str = "SHIELD_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Detection service API key. Without one the overlay stays inert.
    pub api_key: Option<String>,
    /// Base URL of the detection service.
    pub base_url: String,
    /// Attempts per request, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_delay_ms: u64,
    /// Per-attempt request timeout.
    pub timeout_ms: u64,
    /// Ask the service not to log the submitted text.
    pub quiet: bool,
    /// Quiet period after the last edit before detection runs.
    pub debounce_ms: u64,
    /// Master switch for the overlay.
    pub enabled: bool,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_owned(),
            retry_attempts: 3,
            retry_delay_ms: 1000,
            timeout_ms: 30_000,
            quiet: false,
            debounce_ms: 500,
            enabled: true,
        }
    }
}

impl ShieldConfig {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self> {
        loader
            .load()
            .await
            .wrap_err("Failed to load configuration")
    }

    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<()> {
        saver
            .save(self)
            .await
            .wrap_err("Failed to save configuration")
    }

    /// Defaults overlaid with `SHIELD_*` environment variables.
    pub fn from_env() -> core::result::Result<Self, ShieldError> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by `SHIELD_` plus the upper-cased
    /// field name.
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> core::result::Result<Self, ShieldError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(key) = var("API_KEY") {
            self.api_key = Some(key).filter(|k| !k.trim().is_empty());
        }
        if let Some(url) = var("BASE_URL") {
            self.base_url = url;
        }
        if let Some(raw) = var("RETRY_ATTEMPTS") {
            self.retry_attempts = parse_var("RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = var("RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_var("RETRY_DELAY_MS", &raw)?;
        }
        if let Some(raw) = var("TIMEOUT_MS") {
            self.timeout_ms = parse_var("TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = var("DEBOUNCE_MS") {
            self.debounce_ms = parse_var("DEBOUNCE_MS", &raw)?;
        }
        if let Some(raw) = var("QUIET") {
            self.quiet = parse_flag("QUIET", &raw)?;
        }
        if let Some(raw) = var("ENABLED") {
            self.enabled = parse_flag("ENABLED", &raw)?;
        }
        Ok(self)
    }

    /// Enabled and holding a non-empty API key.
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> core::result::Result<T, ShieldError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ShieldError::Config(format!("{ENV_PREFIX}{name}={raw:?}: {e}")))
}

fn parse_flag(name: &str, raw: &str) -> core::result::Result<bool, ShieldError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ShieldError::Config(format!(
            "{ENV_PREFIX}{name}={raw:?}: expected a boolean"
        ))),
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = core::result::Result<ShieldConfig, ShieldError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(
        &self,
        config: &ShieldConfig,
    ) -> impl Future<Output = core::result::Result<(), ShieldError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// The format follows the file extension: `.json` or `.toml`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn unsupported(&self) -> ShieldError {
        ShieldError::UnsupportedFormat {
            path: self.path.display().to_string(),
        }
    }
}

impl Loader for FileStore {
    async fn load(&self) -> core::result::Result<ShieldConfig, ShieldError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&std::fs::read_to_string(&self.path)?)?),
            Some("toml") => Ok(toml::from_str(&std::fs::read_to_string(&self.path)?)?),
            _ => Err(self.unsupported()),
        }
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &ShieldConfig) -> core::result::Result<(), ShieldError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(std::fs::write(
                &self.path,
                serde_json::to_string_pretty(config)?,
            )?),
            Some("toml") => Ok(std::fs::write(&self.path, toml::to_string_pretty(config)?)?),
            _ => Err(self.unsupported()),
        }
    }
}
