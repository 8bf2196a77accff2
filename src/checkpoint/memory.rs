use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{AgentCheckpoint, CheckpointStore, CheckpointSummary};
use crate::errors::StoreError;

/// Process-local checkpoint store. Survives agent restarts within one
/// process, which is what the swarm driver needs for crash recovery tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<(String, String), AgentCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<(), StoreError> {
        let key = (checkpoint.agent_id.clone(), checkpoint.session_id.clone());
        self.entries.write().insert(key, checkpoint.clone());
        Ok(())
    }

    async fn load(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<AgentCheckpoint>, StoreError> {
        let key = (agent_id.to_string(), session_id.to_string());
        Ok(self.entries.read().get(&key).cloned())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<CheckpointSummary>, StoreError> {
        let mut summaries: Vec<CheckpointSummary> = self
            .entries
            .read()
            .values()
            .filter(|cp| cp.agent_id == agent_id)
            .map(AgentCheckpoint::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, agent_id: &str, session_id: &str) -> Result<bool, StoreError> {
        let key = (agent_id.to_string(), session_id.to_string());
        Ok(self.entries.write().remove(&key).is_some())
    }
}
