//! # Engine Configuration
//!
//! [`EngineConfig`] is read from an optional YAML file, then overridden by
//! environment variables, then by whatever the caller (usually CLI flags)
//! sets on the returned value.
//!
//! ```yaml
//! worker_limit: 2
//! deadline_secs: 300
//! state_dir: /var/lib/webapp-stack
//! retry:
//!   max_attempts: 5
//!   strategy: linear
//!   base_delay_ms: 500
//! ```
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STACK_WORKER_LIMIT` | `worker_limit` |
//! | `STACK_DEADLINE_SECS` | `deadline_secs` |
//! | `STACK_STATE_DIR` | `state_dir` |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const ENV_WORKER_LIMIT: &str = "STACK_WORKER_LIMIT";
pub const ENV_DEADLINE_SECS: &str = "STACK_DEADLINE_SECS";
pub const ENV_STATE_DIR: &str = "STACK_STATE_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum steps touching the runtime at once.
    pub worker_limit: usize,
    pub retry: RetryPolicy,
    /// Stop starting new steps after this many seconds.
    pub deadline_secs: Option<u64>,
    /// Directory holding one state file per stack.
    pub state_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            retry: RetryPolicy::default(),
            deadline_secs: None,
            state_dir: PathBuf::from(".stack-state"),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// File (if any) plus process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKER_LIMIT) {
            self.worker_limit = parse_env(ENV_WORKER_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_DEADLINE_SECS) {
            self.deadline_secs = Some(parse_env(ENV_DEADLINE_SECS, &value)?);
        }
        if let Some(value) = lookup(ENV_STATE_DIR) {
            self.state_dir = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}
