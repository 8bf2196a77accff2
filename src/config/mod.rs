//! Configuration Management
//!
//! Loads swarm configuration from TOML files.
//! Configuration includes:
//! - Swarm identity (namespace) and supervision policy
//! - Environment decay parameters
//! - Agent loop budgets, retries and snapshot sizes
//! - Persistence locations
//! - Log filtering

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::supervision::BackoffStrategy;

const DEFAULT_CONFIG_FILE: &str = "stigmer.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub swarm: SwarmConfig,

    #[serde(default)]
    pub environment: EnvironmentConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Namespace attached to every concept, fact and task key.
    #[serde(default = "default_swarm_id")]
    pub swarm_id: String,
    /// Restarts allowed per agent after a crash or a fatal step error
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff: BackoffStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Fraction of strength retained per decay unit; must lie in (0, 1).
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Length of one decay unit in milliseconds.
    #[serde(default = "default_decay_unit_ms")]
    pub decay_unit_ms: u64,
    /// Concepts at or below this strength are left out of `top_concepts`.
    #[serde(default)]
    pub min_strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reason/Act/Observe cycles allowed before the loop is forced to reflect
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_reasoning_retries")]
    pub reasoning_retries: u32,
    #[serde(default = "default_reasoning_backoff")]
    pub reasoning_backoff: BackoffStrategy,
    /// Consecutive store failures tolerated before a session ends as Failed
    #[serde(default = "default_store_retry_budget")]
    pub store_retry_budget: u32,
    #[serde(default = "default_store_backoff")]
    pub store_backoff: BackoffStrategy,
    #[serde(default = "default_snapshot_concepts")]
    pub snapshot_concepts: usize,
    #[serde(default = "default_snapshot_facts")]
    pub snapshot_facts: usize,
    /// Weight applied to concepts reinforced while reflecting
    #[serde(default = "default_reflection_weight")]
    pub reflection_weight: f64,
    /// Per-call timeout enforced by the capability registry (0 = none)
    #[serde(default)]
    pub capability_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory for per-session checkpoint files. In-memory when unset.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// JSON snapshot of the environment, loaded at start and saved at the end of a run.
    #[serde(default)]
    pub environment_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// EnvFilter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            swarm_id: default_swarm_id(),
            max_restarts: default_max_restarts(),
            restart_backoff: default_restart_backoff(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            decay_rate: default_decay_rate(),
            decay_unit_ms: default_decay_unit_ms(),
            min_strength: 0.0,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            reasoning_retries: default_reasoning_retries(),
            reasoning_backoff: default_reasoning_backoff(),
            store_retry_budget: default_store_retry_budget(),
            store_backoff: default_store_backoff(),
            snapshot_concepts: default_snapshot_concepts(),
            snapshot_facts: default_snapshot_facts(),
            reflection_weight: default_reflection_weight(),
            capability_timeout_ms: 0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_swarm_id() -> String {
    "default".to_string()
}
fn default_max_restarts() -> u32 {
    3
}
fn default_restart_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential {
        base_ms: 100,
        max_ms: 5_000,
    }
}
fn default_decay_rate() -> f64 {
    0.9
}
fn default_decay_unit_ms() -> u64 {
    60_000
}
fn default_max_steps() -> u32 {
    16
}
fn default_reasoning_retries() -> u32 {
    3
}
fn default_reasoning_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential {
        base_ms: 200,
        max_ms: 5_000,
    }
}
fn default_store_retry_budget() -> u32 {
    5
}
fn default_store_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential {
        base_ms: 100,
        max_ms: 2_000,
    }
}
fn default_snapshot_concepts() -> usize {
    5
}
fn default_snapshot_facts() -> usize {
    10
}
fn default_reflection_weight() -> f64 {
    1.0
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl EnvironmentConfig {
    pub fn decay_unit(&self) -> Duration {
        Duration::from_millis(self.decay_unit_ms)
    }
}

impl AgentConfig {
    pub fn capability_timeout(&self) -> Option<Duration> {
        (self.capability_timeout_ms > 0).then(|| Duration::from_millis(self.capability_timeout_ms))
    }
}

impl Config {
    /// Load configuration from `path`, or from `stigmer.toml` in the working
    /// directory when no path is given (falling back to defaults if absent),
    /// then apply `STIGMER_*` environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| ConfigError::Read {
                    path: p.to_path_buf(),
                    message: e.to_string(),
                })?;
                Self::from_toml(&content)?
            }
            None => match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(content) => Self::from_toml(&content)?,
                Err(_) => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("STIGMER_SWARM_ID") {
            self.swarm.swarm_id = id;
        }
        if let Ok(rate) = std::env::var("STIGMER_DECAY_RATE") {
            if let Ok(r) = rate.parse::<f64>() {
                self.environment.decay_rate = r;
            }
        }
        if let Ok(steps) = std::env::var("STIGMER_MAX_STEPS") {
            if let Ok(n) = steps.parse::<u32>() {
                self.agent.max_steps = n;
            }
        }
        if let Ok(dir) = std::env::var("STIGMER_CHECKPOINT_DIR") {
            self.persistence.checkpoint_dir = Some(PathBuf::from(dir));
        }
        if let Ok(filter) = std::env::var("STIGMER_LOG") {
            self.telemetry.filter = filter;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.environment.decay_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(ConfigError::Invalid {
                field: "environment.decay_rate",
                message: format!("must be in (0, 1), got {}", rate),
            });
        }
        if self.environment.decay_unit_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "environment.decay_unit_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if !(self.environment.min_strength >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "environment.min_strength",
                message: format!("must be >= 0, got {}", self.environment.min_strength),
            });
        }
        if self.agent.max_steps == 0 {
            return Err(ConfigError::Invalid {
                field: "agent.max_steps",
                message: "must be at least 1".to_string(),
            });
        }
        if !(self.agent.reflection_weight > 0.0 && self.agent.reflection_weight.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "agent.reflection_weight",
                message: format!("must be finite and > 0, got {}", self.agent.reflection_weight),
            });
        }
        if self.swarm.swarm_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "swarm.swarm_id",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
