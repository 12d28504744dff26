use serde::Deserialize;
use std::collections::HashMap;
use std::{fs, path::Path, time::Duration};

use crate::supervision::RestartBudget;

pub mod error;

use error::{ConfigError, ConfigResult};

pub const DEFAULT_WORKER_BUFFER_SIZE: usize = 16;
pub const DEFAULT_DEADLINE_MS: u64 = 500;
pub const DEFAULT_VOTE: i64 = 42;
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_RESTART_WINDOW_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 1000;
pub const DEFAULT_SINK_FAILURE_RATE: f64 = 0.5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

/// Deadline and fallback used by every batch call.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_vote")]
    pub default_value: i64,
    #[serde(default = "default_worker_buffer_size")]
    pub worker_buffer_size: usize,
}

/// Restart budget applied to each supervised worker.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisionConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window_ms")]
    pub restart_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupConfig {
    #[serde(default)]
    pub missing_value: i64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default)]
    pub votes: HashMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_writers")]
    pub writers: usize,
    #[serde(default = "default_sink_failure_rate")]
    pub sink_failure_rate: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_DEADLINE_MS,
            default_value: DEFAULT_VOTE,
            worker_buffer_size: DEFAULT_WORKER_BUFFER_SIZE,
        }
    }
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_window_ms: DEFAULT_RESTART_WINDOW_MS,
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            missing_value: 0,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            failure_rate: 0.0,
            votes: HashMap::new(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            writers: default_writers(),
            sink_failure_rate: DEFAULT_SINK_FAILURE_RATE,
        }
    }
}

impl BatchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl SupervisionConfig {
    pub fn budget(&self) -> RestartBudget {
        RestartBudget::new(
            self.max_restarts,
            Duration::from_millis(self.restart_window_ms),
        )
    }
}

impl LookupConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl TallyConfig {
    pub fn from_toml_str(toml_str: &str) -> ConfigResult<Self> {
        let config: TallyConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Rejects values that would panic or silently misbehave at runtime.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.worker_buffer_size == 0 {
            return Err(ConfigError::ValidationError {
                reason: "batch.worker_buffer_size must be greater than zero".to_string(),
            });
        }
        if self.recorder.writers == 0 {
            return Err(ConfigError::ValidationError {
                reason: "recorder.writers must be greater than zero".to_string(),
            });
        }
        check_rate("lookup.failure_rate", self.lookup.failure_rate)?;
        check_rate("recorder.sink_failure_rate", self.recorder.sink_failure_rate)?;
        Ok(())
    }
}

fn check_rate(name: &str, rate: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            reason: format!("{} must be within [0, 1], got {}", name, rate),
        })
    }
}

fn default_deadline_ms() -> u64 {
    DEFAULT_DEADLINE_MS
}

fn default_vote() -> i64 {
    DEFAULT_VOTE
}

fn default_worker_buffer_size() -> usize {
    DEFAULT_WORKER_BUFFER_SIZE
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_restart_window_ms() -> u64 {
    DEFAULT_RESTART_WINDOW_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_writers() -> usize {
    1
}

fn default_sink_failure_rate() -> f64 {
    DEFAULT_SINK_FAILURE_RATE
}
