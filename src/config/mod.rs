//! Executor configuration: pool sizing and platform ceilings.
//!
//! Project-level config: `.tool-sandbox/executor.yaml`
//! Override: `TOOL_SANDBOX_CONFIG=/path/to/executor.yaml`
//!
//! Resolution: env var path → project file → built-in defaults.
//! Defaults are deny-by-default: no network, no filesystem, no env.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::HostPattern;

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "TOOL_SANDBOX_CONFIG";

/// Project-relative config file.
pub const PROJECT_CONFIG: &str = ".tool-sandbox/executor.yaml";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid executor config: {0}")]
    Invalid(String),
}

/// What happens when every isolation slot is busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Fail immediately with `ResourceExhausted`.
    Reject,
    /// Wait in a bounded queue. The wait is also bounded by the caller deadline.
    Queue { max_waiting: usize, max_wait_ms: u64 },
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        SaturationPolicy::Queue {
            max_waiting: 32,
            max_wait_ms: 2_000,
        }
    }
}

/// Hosts any tool may ever be granted. Empty = no egress at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCeiling {
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Directories under which readonly grants may be made. Empty = no filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemCeiling {
    #[serde(default)]
    pub readonly_roots: Vec<PathBuf>,
}

/// Top-level executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of execution contexts alive at once.
    pub pool_size: usize,
    pub saturation: SaturationPolicy,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub default_memory_bytes: u64,
    /// `None` lets tools declare unbounded memory.
    pub max_memory_bytes: Option<u64>,
    pub network: NetworkCeiling,
    pub filesystem: FilesystemCeiling,
    /// Host env vars a tool may ask to see.
    pub env_passthrough: Vec<String>,
    pub max_output_bytes: usize,
    pub max_log_lines: usize,
    /// Granularity of deadline enforcement.
    pub epoch_tick_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            saturation: SaturationPolicy::default(),
            default_timeout_ms: 5_000,
            max_timeout_ms: 30_000,
            default_memory_bytes: 64 * MIB,
            max_memory_bytes: Some(256 * MIB),
            network: NetworkCeiling::default(),
            filesystem: FilesystemCeiling::default(),
            env_passthrough: Vec::new(),
            max_output_bytes: MIB as usize,
            max_log_lines: 64,
            epoch_tick_ms: 10,
        }
    }
}

impl ExecutorConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a config from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Find the config: `TOOL_SANDBOX_CONFIG`, then the project file, then defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        let project = Path::new(PROJECT_CONFIG);
        if project.exists() {
            return Self::load(project);
        }
        Ok(Self::default())
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject configurations that would weaken the pool or ceiling guarantees.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("default_timeout_ms must be positive".into()));
        }
        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "default_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.default_timeout_ms, self.max_timeout_ms
            )));
        }
        if self.default_memory_bytes == 0 {
            return Err(ConfigError::Invalid("default_memory_bytes must be positive".into()));
        }
        if let Some(max) = self.max_memory_bytes {
            if self.default_memory_bytes > max {
                return Err(ConfigError::Invalid(format!(
                    "default_memory_bytes ({}) exceeds max_memory_bytes ({max})",
                    self.default_memory_bytes
                )));
            }
        }
        if let SaturationPolicy::Queue {
            max_waiting,
            max_wait_ms,
        } = &self.saturation
        {
            if *max_waiting == 0 || *max_wait_ms == 0 {
                return Err(ConfigError::Invalid(
                    "queue saturation needs max_waiting and max_wait_ms above zero; use mode: reject instead"
                        .into(),
                ));
            }
        }
        if self.epoch_tick_ms == 0 {
            return Err(ConfigError::Invalid("epoch_tick_ms must be positive".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid("max_output_bytes must be positive".into()));
        }
        for host in &self.network.allowed_hosts {
            HostPattern::parse(host)
                .map_err(|e| ConfigError::Invalid(format!("network.allowed_hosts: {e}")))?;
        }
        for root in &self.filesystem.readonly_roots {
            if !root.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "filesystem.readonly_roots entry '{}' must be absolute",
                    root.display()
                )));
            }
        }
        Ok(())
    }
}
