use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::{Overflow, QueueConfig, Wait};
use crate::{hlog_debug, Error, Result};

/// Shutdown timeout used when the config leaves it unset.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

/// Orchestration settings, usually read from `~/.hri/hri.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Escalate any task failure to a full shutdown.
    #[serde(default)]
    pub fail_fast: bool,
    /// Stop after this many cycles. Unset runs until stopped.
    pub max_cycles: Option<u64>,
    /// Pause between cycles.
    #[serde(default)]
    pub cycle_interval_ms: u64,
    pub shutdown_timeout_ms: Option<u64>,
    /// Consecutive starved cycles a task may accumulate before the run drains.
    pub starvation_limit: Option<u32>,
    /// Default settings for every queued channel.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Per-task overrides keyed by task name.
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskOverrides>,
    /// Per-channel queue overrides keyed by channel name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelOverrides>,
}

/// Per-task settings. Present fields replace the options set in code.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TaskOverrides {
    pub readiness_timeout_ms: Option<u64>,
    pub queue_wait_ms: Option<u64>,
    #[serde(default)]
    pub queue_wait_forever: bool,
    pub interval_ms: Option<u64>,
    pub only_fresh: Option<bool>,
}

impl TaskOverrides {
    pub fn queue_wait(&self) -> Option<Wait> {
        if self.queue_wait_forever {
            return Some(Wait::Forever);
        }
        self.queue_wait_ms.map(Wait::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelOverrides {
    pub capacity: Option<usize>,
    pub overflow: Option<Overflow>,
}

impl Config {
    pub fn hri_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hri"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hri_dir()?.join("hri.toml"))
    }

    /// Load `~/.hri/hri.toml`, falling back to defaults when it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        hlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            hlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        hlog_debug!(
            "Config loaded: fail_fast={}, max_cycles={:?}, tasks={}, channels={}",
            config.fail_fast,
            config.max_cycles,
            config.tasks.len(),
            config.channels.len()
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        hlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(
            self.shutdown_timeout_ms
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        )
    }

    pub fn cycle_interval(&self) -> Option<Duration> {
        (self.cycle_interval_ms > 0).then(|| Duration::from_millis(self.cycle_interval_ms))
    }

    pub fn task(&self, name: &str) -> Option<&TaskOverrides> {
        self.tasks.get(name)
    }

    /// Effective queue settings for a channel.
    pub fn queue_for(&self, channel: &str) -> QueueConfig {
        let mut queue = self.queue.clone();
        if let Some(over) = self.channels.get(channel) {
            if let Some(capacity) = over.capacity {
                queue.capacity = capacity;
            }
            if let Some(overflow) = over.overflow {
                queue.overflow = overflow;
            }
        }
        queue
    }
}
