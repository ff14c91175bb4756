use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use supertask_types::DisposePolicy;

/// Capacity of the control command channel between handles and the driver task.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

const fn default_command_capacity() -> usize {
    DEFAULT_COMMAND_CAPACITY
}

/// On-disk configuration.
///
/// ```toml
/// [queue]
/// immediate = true
/// default_wait_ms = 250
/// dispose_policy = "once"
/// command_capacity = 64
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct SupertaskConfig {
    pub queue: Option<QueueConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Start running as soon as the engine is constructed. Default: false.
    #[serde(default)]
    pub immediate: bool,
    /// Wait applied to steps that don't set their own. Default: 0.
    #[serde(default)]
    pub default_wait_ms: u64,
    /// "repeat" (default) or "once".
    #[serde(default)]
    pub dispose_policy: DisposePolicy,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            immediate: false,
            default_wait_ms: 0,
            dispose_policy: DisposePolicy::default(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Runtime options for a queue, evaluated once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub immediate: bool,
    pub default_wait: Duration,
    pub dispose_policy: DisposePolicy,
    pub command_capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            immediate: false,
            default_wait: Duration::ZERO,
            dispose_policy: DisposePolicy::default(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl QueueOptions {
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        // A zero-capacity mpsc channel panics on construction.
        let command_capacity = if config.command_capacity == 0 {
            tracing::warn!(
                "queue.command_capacity must be positive; using {DEFAULT_COMMAND_CAPACITY}"
            );
            DEFAULT_COMMAND_CAPACITY
        } else {
            config.command_capacity
        };
        Self {
            immediate: config.immediate,
            default_wait: Duration::from_millis(config.default_wait_ms),
            dispose_policy: config.dispose_policy,
            command_capacity,
        }
    }
}

impl SupertaskConfig {
    /// Load the config from the default location.
    ///
    /// A missing file is not an error and yields `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match Self::path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// `~/.supertask/config.toml`, or `None` without a home directory.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".supertask").join("config.toml"))
    }

    /// Queue options, falling back to defaults when `[queue]` is absent.
    #[must_use]
    pub fn queue_options(&self) -> QueueOptions {
        self.queue
            .as_ref()
            .map(QueueOptions::from)
            .unwrap_or_default()
    }
}
