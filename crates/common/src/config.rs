//! Common configuration utilities
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::{Error, Result};

/// Base trait for all configuration types
pub trait Configuration: Serialize + for<'de> Deserialize<'de> + Default {
    /// Validate the configuration
    fn validate(&self) -> Result<()>;

    /// Override fields from environment variables named `<prefix>_<FIELD>`
    fn apply_env(&mut self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file
    fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| Error::configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load configuration from defaults plus environment variables with the given prefix
    fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

/// Read `<prefix>_<key>` from the environment
pub fn env_var(prefix: &str, key: &str) -> Option<String> {
    std::env::var(format!("{}_{}", prefix, key)).ok()
}

/// Read and parse `<prefix>_<key>` from the environment
pub fn parse_env_var<T>(prefix: &str, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(prefix, key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::configuration(format!("Invalid value for {}_{}: {}", prefix, key, e))
        }),
        None => Ok(None),
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; console only when absent
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// File name prefix for rolled log files
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "voty".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

impl Configuration for LogConfig {
    fn validate(&self) -> Result<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(Error::configuration(format!(
                    "Invalid log level: {}",
                    self.level
                )))
            }
        }

        if self.file_prefix.is_empty() {
            return Err(Error::configuration("Log file prefix cannot be empty"));
        }

        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> Result<()> {
        if let Some(level) = env_var(prefix, "LOG_LEVEL") {
            self.level = level.to_lowercase();
        }

        if let Some(dir) = env_var(prefix, "LOG_DIR") {
            self.directory = Some(PathBuf::from(dir));
        }

        Ok(())
    }
}

/// Helper function to create directories needed for configurations
pub fn ensure_directory(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        debug!(path = %path.display(), "creating directory");
        fs::create_dir_all(path).map_err(|e| {
            Error::configuration(format!(
                "Failed to create directory '{}': {}",
                path.display(),
                e
            ))
        })?;
    }

    Ok(())
}
