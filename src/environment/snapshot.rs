//! JSON persistence for [`InMemoryEnvironment`].
//!
//! Concepts are dumped as their raw `(strength, last_updated_at)` pairs so
//! decay keeps running from the right instant after a reload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{newest_first, Concept, Fact, InMemoryEnvironment, SwarmId, Task};
use crate::clock::Clock;
use crate::config::EnvironmentConfig;
use crate::errors::StoreError;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmDump {
    pub concepts: Vec<Concept>,
    pub facts: Vec<Fact>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDump {
    pub version: u32,
    pub swarms: BTreeMap<SwarmId, SwarmDump>,
}

impl InMemoryEnvironment {
    /// Copy of everything stored, with concepts sorted by name and facts
    /// newest first.
    pub fn dump(&self) -> EnvironmentDump {
        let mut swarms = BTreeMap::new();
        for id in self.swarm_ids() {
            let tables = self.tables(&id);

            let cells: Vec<_> = tables.concepts.read().values().cloned().collect();
            let mut concepts: Vec<Concept> = cells.iter().map(|c| c.lock().clone()).collect();
            concepts.sort_by(|a, b| a.name.cmp(&b.name));

            let logs: Vec<_> = tables.facts.read().values().cloned().collect();
            let mut facts: Vec<Fact> = logs.iter().flat_map(|l| l.read().clone()).collect();
            facts.sort_by(newest_first);

            let tasks = tables.tasks.lock().clone();
            swarms.insert(
                id,
                SwarmDump {
                    concepts,
                    facts,
                    tasks,
                },
            );
        }
        EnvironmentDump {
            version: SNAPSHOT_VERSION,
            swarms,
        }
    }

    pub fn restore(dump: EnvironmentDump, config: &EnvironmentConfig, clock: Arc<dyn Clock>) -> Self {
        let env = Self::new(config, clock);
        for (swarm, contents) in dump.swarms {
            for concept in contents.concepts {
                env.insert_concept(&swarm, concept);
            }
            // Facts were dumped newest first; re-append oldest first.
            for fact in contents.facts.into_iter().rev() {
                env.insert_fact(&swarm, fact);
            }
            for task in contents.tasks {
                env.insert_task(&swarm, task);
            }
        }
        env
    }

    /// Write the environment to `path` atomically (temp file + rename).
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let dump = self.dump();
        let json = serde_json::to_string_pretty(&dump).map_err(|e| StoreError::Serialization {
            what: "environment snapshot".to_string(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;

        info!(path = %path.display(), swarms = dump.swarms.len(), "Environment snapshot saved");
        Ok(())
    }

    /// Load a snapshot written by [`save_snapshot`](Self::save_snapshot). A
    /// missing file yields an empty environment.
    pub fn load_snapshot(
        path: &Path,
        config: &EnvironmentConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new(config, clock));
        }
        let json = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let dump: EnvironmentDump =
            serde_json::from_str(&json).map_err(|e| StoreError::Serialization {
                what: format!("environment snapshot {}", path.display()),
                message: e.to_string(),
            })?;
        info!(path = %path.display(), swarms = dump.swarms.len(), "Environment snapshot loaded");
        Ok(Self::restore(dump, config, clock))
    }
}
