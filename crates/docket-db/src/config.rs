//! Database configuration, loaded from TOML

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docket_profiler::{ProfilingLevel, DEFAULT_SLOW_MS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// Database name; the `<db>` part of every namespace
    pub name: String,
    /// Wall-clock bound for one `eval`
    pub eval_timeout_ms: u64,
    /// Threshold for level 1 profiling
    pub slow_ms: u64,
    /// Documents kept in `system.profile` before the oldest are dropped
    pub profile_capacity: usize,
    /// Level in force when the database opens: 0, 1 or 2
    pub profiling_level: u8,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            name: "test".to_string(),
            eval_timeout_ms: 30_000,
            slow_ms: DEFAULT_SLOW_MS,
            profile_capacity: 1_024,
            profiling_level: 0,
        }
    }
}

impl DbConfig {
    /// Read and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DbConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains('.') || self.name.contains('$') {
            return Err(ConfigError::Invalid {
                field: "name",
                message: format!("'{}' is not a valid database name", self.name),
            });
        }
        if self.profile_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "profile_capacity",
                message: "must be at least 1".into(),
            });
        }
        if self.eval_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "eval_timeout_ms",
                message: "must be at least 1".into(),
            });
        }
        self.initial_level()?;
        Ok(())
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }

    pub fn initial_level(&self) -> Result<ProfilingLevel, ConfigError> {
        ProfilingLevel::try_from(i64::from(self.profiling_level)).map_err(|_| ConfigError::Invalid {
            field: "profiling_level",
            message: format!("{} is not 0, 1 or 2", self.profiling_level),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config field `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}
