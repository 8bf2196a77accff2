//! Shared Stigmergic Environment
//!
//! The only coordination channel between agents. Agents never message each
//! other; they leave traces here and read the traces others left:
//! - **Concepts**: named pheromone weights, reinforced by agents and
//!   evaporating with elapsed time
//! - **Facts**: an append-only log of findings, queryable by topic
//! - **Tasks**: a shared board of open work items
//!
//! Every key is scoped by a [`SwarmId`], so unrelated swarms sharing one
//! backend never see each other's traces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::StoreError;

pub mod decay;
pub mod memory;
pub mod snapshot;

pub use decay::DecayLaw;
pub use memory::InMemoryEnvironment;
pub use snapshot::EnvironmentDump;

/// Namespace attached to every concept, fact and task key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwarmId(String);

impl SwarmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SwarmId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SwarmId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stored pheromone state. `strength` is the value as of `last_updated_at`;
/// the current value is derived with the [`DecayLaw`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    pub strength: f64,
    pub last_updated_at: DateTime<Utc>,
}

/// A concept's strength evaluated at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptReading {
    pub name: String,
    pub strength: f64,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable published finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub topic: String,
    pub content: String,
    pub source_agent_id: String,
    pub created_at: DateTime<Utc>,
    /// Store-wide insertion order; breaks ties between equal timestamps.
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Completed {
        by: String,
        at: DateTime<Utc>,
    },
}

/// A shared work item on the task board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub source_agent_id: String,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl Task {
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Open)
    }
}

/// Operations every environment backend provides.
///
/// Implementations must make `reinforce` an atomic read-decay-add-write per
/// concept and `add_fact` an atomic append per topic, without a lock spanning
/// unrelated keys.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Add `delta` (> 0) to the decayed strength of `name`, creating the
    /// concept on first use. Returns the new strength.
    async fn reinforce(&self, swarm: &SwarmId, name: &str, delta: f64) -> Result<f64, StoreError>;

    /// Current decayed strength; `0.0` for a concept never reinforced.
    async fn strength_of(&self, swarm: &SwarmId, name: &str) -> Result<f64, StoreError>;

    /// Up to `k` concepts by current strength, strongest first. Ties go to the
    /// most recently updated, then to the lexicographically smaller name.
    async fn top_concepts(&self, swarm: &SwarmId, k: usize)
        -> Result<Vec<ConceptReading>, StoreError>;

    async fn add_fact(
        &self,
        swarm: &SwarmId,
        topic: &str,
        content: &str,
        source_agent_id: &str,
    ) -> Result<FactId, StoreError>;

    /// Facts whose topic equals `topic` exactly, most recent first.
    async fn get_facts(&self, swarm: &SwarmId, topic: &str, limit: usize)
        -> Result<Vec<Fact>, StoreError>;

    /// Case-insensitive substring search over fact content across all topics,
    /// most recent first.
    async fn search_facts(&self, swarm: &SwarmId, query: &str, limit: usize)
        -> Result<Vec<Fact>, StoreError>;

    async fn post_task(
        &self,
        swarm: &SwarmId,
        description: &str,
        source_agent_id: &str,
    ) -> Result<TaskId, StoreError>;

    /// Open tasks, oldest first.
    async fn open_tasks(&self, swarm: &SwarmId, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Mark a task done. The first completion wins and returns `true`; later
    /// completions are no-ops returning `false`.
    async fn complete_task(
        &self,
        swarm: &SwarmId,
        task_id: &TaskId,
        agent_id: &str,
    ) -> Result<bool, StoreError>;
}

/// Ordering used by every fact listing: newest first, insertion order
/// breaking timestamp ties.
pub(crate) fn newest_first(a: &Fact, b: &Fact) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.sequence.cmp(&a.sequence))
}

/// Ordering used by `top_concepts`.
pub(crate) fn strongest_first(a: &ConceptReading, b: &ConceptReading) -> std::cmp::Ordering {
    b.strength
        .total_cmp(&a.strength)
        .then_with(|| b.last_updated_at.cmp(&a.last_updated_at))
        .then_with(|| a.name.cmp(&b.name))
}
