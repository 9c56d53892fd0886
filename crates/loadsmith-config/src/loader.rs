//! Loading configuration from disk and the environment

use crate::LoadsmithConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding `engine.path`
pub const ENV_ENGINE: &str = "LOADSMITH_ENGINE";
/// Environment variable overriding `storage.working_dir`
pub const ENV_WORKING_DIR: &str = "LOADSMITH_WORKING_DIR";
/// Environment variable overriding `runs.max_concurrent`
pub const ENV_MAX_CONCURRENT: &str = "LOADSMITH_MAX_CONCURRENT";
/// Environment variable overriding `runs.timeout_secs`
pub const ENV_RUN_TIMEOUT: &str = "LOADSMITH_RUN_TIMEOUT";

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that failed to load
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`LoadsmithConfig`]
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Underlying TOML error
        source: toml::de::Error,
    },

    /// An environment override carried an unusable value
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },

    /// A setting is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Could not serialize the configuration back to TOML
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Writing an example config failed
    #[error("Failed to write config file {path}: {source}")]
    Write {
        /// Destination file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl LoadsmithConfig {
    /// Load with precedence defaults < file < environment.
    ///
    /// `config_file` defaults to [`LoadsmithConfig::default_config_path`].
    /// A missing file is not an error.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = config_file.or_else(Self::default_config_path);
        let mut config = match path {
            Some(path) => Self::from_file_or_default(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, returning defaults when it does not exist
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                debug!(path = %path.display(), "Loading config file");
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(engine) = lookup(ENV_ENGINE) {
            self.engine.path = PathBuf::from(engine);
        }
        if let Some(dir) = lookup(ENV_WORKING_DIR) {
            self.storage.working_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT) {
            self.runs.max_concurrent = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_MAX_CONCURRENT,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_RUN_TIMEOUT) {
            let secs = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_RUN_TIMEOUT,
                value: value.clone(),
            })?;
            self.runs.timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("engine.path must not be empty".into()));
        }
        if self.runs.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "runs.max_concurrent must be at least 1".into(),
            ));
        }
        if self.runs.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "runs.timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `~/.config/loadsmith/config.toml` (platform equivalent)
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("loadsmith").join("config.toml"))
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write an example config file with the current values
    pub fn create_example(&self, path: &Path) -> Result<(), ConfigError> {
        let body = format!(
            "# loadsmith configuration\n# Location: {}\n\n{}",
            path.display(),
            self.to_toml()?
        );
        let write = |path: &Path| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, body.as_bytes())
        };
        write(path).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
