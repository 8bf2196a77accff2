use std::path::PathBuf;
use thiserror::Error;

/// The central error type for the swarm runtime.
///
/// Each layer (environment, checkpoints, capabilities, reasoning, the control
/// loop itself) has its own enum; this wrapper lets callers handle them
/// uniformly while still matching on the layer that failed.
#[derive(Error, Debug)]
pub enum StigmerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures of the stigmergic environment or the checkpoint store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Reinforcement delta must be finite and > 0, got {delta}")]
    InvalidDelta { delta: f64 },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Failed to serialize {what}: {message}")]
    Serialization { what: String, message: String },

    #[error("Storage error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("Capability '{name}' failed: {message}")]
    Execution { name: String, message: String },

    #[error("Capability '{name}' not found")]
    NotFound { name: String },

    #[error("Invalid arguments for capability '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    #[error("Capability '{name}' timed out after {millis} ms")]
    Timeout { name: String, millis: u64 },

    #[error("Capabilities disabled for agent '{agent_id}'")]
    Disabled { agent_id: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("Reasoning backend unavailable: {0}")]
    Unavailable(String),

    #[error("Reasoning backend returned an unusable decision: {0}")]
    InvalidDecision(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session {session_id} of agent {agent_id} already terminated ({phase})")]
    AlreadyTerminated {
        agent_id: String,
        session_id: String,
        phase: String,
    },

    #[error("Checkpoint for {agent_id}/{session_id} is inconsistent: {reason}")]
    CorruptCheckpoint {
        agent_id: String,
        session_id: String,
        reason: String,
    },

    #[error("Agent task panicked: {0}")]
    Panic(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, StigmerError>;

/// True when the error (possibly wrapped) came from an unreachable store.
pub fn is_store_unavailable(e: &StigmerError) -> bool {
    matches!(e, StigmerError::Store(s) if s.is_transient())
}
