//! Reasoning seam.
//!
//! The control loop treats the reasoning backend as an opaque function:
//! goal, conversation context and an environment snapshot in, a tool call or
//! a final answer out. How the decision is produced (prompting, model
//! choice) is up to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Message, Role, ToolCall};
use crate::config::AgentConfig;
use crate::environment::{ConceptReading, Environment, Fact, SwarmId, Task};
use crate::errors::{ReasoningError, StoreError};

pub mod scripted;

pub use scripted::ScriptedReasoner;

/// What the reasoner wants to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Call(ToolCall),
    Answer { text: String },
}

impl Decision {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer { text: text.into() }
    }
}

/// Read-only slice of the environment handed to the reasoner each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentView {
    pub concepts: Vec<ConceptReading>,
    /// Recent facts under the session's task topic.
    pub facts: Vec<Fact>,
    pub open_tasks: Vec<Task>,
}

impl EnvironmentView {
    pub async fn capture(
        env: &dyn Environment,
        swarm: &SwarmId,
        topic: &str,
        config: &AgentConfig,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            concepts: env.top_concepts(swarm, config.snapshot_concepts).await?,
            facts: env.get_facts(swarm, topic, config.snapshot_facts).await?,
            open_tasks: env.open_tasks(swarm, config.snapshot_facts).await?,
        })
    }
}

/// What the agent learned, written back during `Reflecting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub summary: String,
    /// Concepts to reinforce.
    pub concepts: Vec<String>,
}

impl Reflection {
    /// Summary built from the context alone, without a backend call.
    pub fn summarize(goal: &str, context: &[Message], answer: Option<&str>) -> Self {
        let observations = context.iter().filter(|m| m.role == Role::Tool).count();
        let outcome = answer.unwrap_or("no final answer");
        Self {
            summary: format!(
                "Goal: {}\nOutcome: {}\nObservations: {}",
                goal, outcome, observations
            ),
            concepts: vec![goal.trim().to_lowercase()],
        }
    }
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn decide(
        &self,
        goal: &str,
        context: &[Message],
        view: &EnvironmentView,
    ) -> Result<Decision, ReasoningError>;

    async fn reflect(
        &self,
        goal: &str,
        context: &[Message],
        answer: Option<&str>,
    ) -> Result<Reflection, ReasoningError> {
        Ok(Reflection::summarize(goal, context, answer))
    }
}
