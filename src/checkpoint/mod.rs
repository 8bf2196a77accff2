//! Agent Checkpoints
//!
//! Durable snapshot of one agent's control-loop state, keyed by
//! `(agent_id, session_id)`. Stores only persist and return checkpoints;
//! the owning control loop is the only writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::environment::SwarmId;
use crate::errors::StoreError;

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reasoning,
    Acting,
    Observing,
    Reflecting,
    Done,
    /// Terminal after the store retry budget ran out.
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Acting => "acting",
            Self::Observing => "observing",
            Self::Reflecting => "reflecting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path led a session to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Answered,
    BudgetExhausted,
    ReasoningUnavailable,
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Answered => "answered",
            Self::BudgetExhausted => "budget exhausted",
            Self::ReasoningUnavailable => "reasoning unavailable",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry of the conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            at,
        }
    }

    pub fn assistant(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            at,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            tool: tool.into(),
            args,
        }
    }

    /// Same call with a caller-chosen id; used by deterministic reasoners.
    pub fn with_id(id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    /// Text appended to the conversation context for this result.
    pub fn observation(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(Value::String(s)) => s.clone(),
            ToolOutcome::Success(v) => v.to_string(),
            ToolOutcome::Failure(e) => format!("Tool '{}' failed: {}", self.tool, e),
        }
    }
}

/// Fixed-shape record of one agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub agent_id: String,
    pub session_id: String,
    pub swarm_id: SwarmId,
    /// Topic under which the reflection summary is published.
    pub task_id: String,
    pub goal: String,
    pub phase: Phase,
    /// Call persisted before dispatch; re-issued when resuming in `Acting`.
    pub pending_action: Option<ToolCall>,
    /// Result carried from `Acting` to `Observing`.
    #[serde(default)]
    pub last_result: Option<ToolResult>,
    #[serde(default)]
    pub conversation_context: Vec<Message>,
    /// Completed Reason/Act/Observe cycles.
    #[serde(default)]
    pub step: u32,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub termination: Option<Termination>,
    /// Why the session ended `Failed`.
    #[serde(default)]
    pub failure: Option<String>,
    /// Idempotency key of the last effect batch written to the environment.
    #[serde(default)]
    pub applied_effects: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentCheckpoint {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        swarm_id: SwarmId,
        task_id: impl Into<String>,
        goal: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            swarm_id,
            task_id: task_id.into(),
            goal: goal.into(),
            phase: Phase::Reasoning,
            pending_action: None,
            last_result: None,
            conversation_context: Vec::new(),
            step: 0,
            final_answer: None,
            termination: None,
            failure: None,
            applied_effects: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            agent_id: self.agent_id.clone(),
            session_id: self.session_id.clone(),
            phase: self.phase,
            step: self.step,
            termination: self.termination,
            updated_at: self.updated_at,
        }
    }

    /// Structural checks run before resuming from a loaded checkpoint.
    pub fn validate(&self) -> Result<(), String> {
        match self.phase {
            Phase::Acting if self.pending_action.is_none() => {
                Err("phase is acting but no pending action is recorded".to_string())
            }
            Phase::Observing if self.last_result.is_none() => {
                Err("phase is observing but no tool result is recorded".to_string())
            }
            Phase::Done if self.termination.is_none() => {
                Err("phase is done without a termination marker".to_string())
            }
            Phase::Failed if self.failure.is_none() => {
                Err("phase is failed without a failure reason".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub agent_id: String,
    pub session_id: String,
    pub phase: Phase,
    pub step: u32,
    pub termination: Option<Termination>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for agent checkpoints.
///
/// `save` is an upsert by `(agent_id, session_id)` and must be atomic: a
/// concurrent `load` sees either the previous or the new checkpoint, never
/// a partial one.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<(), StoreError>;

    /// `Ok(None)` when no checkpoint exists for the pair.
    async fn load(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<AgentCheckpoint>, StoreError>;

    /// Sessions of one agent, most recently updated first.
    async fn list(&self, agent_id: &str) -> Result<Vec<CheckpointSummary>, StoreError>;

    /// Returns whether a checkpoint was removed.
    async fn delete(&self, agent_id: &str, session_id: &str) -> Result<bool, StoreError>;
}
