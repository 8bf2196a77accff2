//! In-process environment backend.
//!
//! Locking is per key: each swarm owns its own tables, each concept sits
//! behind its own mutex and each fact topic behind its own lock. The outer
//! maps are only write-locked to insert a missing key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{
    newest_first, strongest_first, Concept, ConceptReading, DecayLaw, Environment, Fact, FactId,
    SwarmId, Task, TaskId, TaskStatus,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EnvironmentConfig;
use crate::errors::StoreError;

type ConceptCell = Arc<Mutex<Concept>>;
type TopicLog = Arc<RwLock<Vec<Fact>>>;

#[derive(Default)]
pub(crate) struct SwarmTables {
    pub(crate) concepts: RwLock<HashMap<String, ConceptCell>>,
    pub(crate) facts: RwLock<HashMap<String, TopicLog>>,
    pub(crate) tasks: Mutex<Vec<Task>>,
}

pub struct InMemoryEnvironment {
    clock: Arc<dyn Clock>,
    decay: DecayLaw,
    min_strength: f64,
    swarms: RwLock<HashMap<SwarmId, Arc<SwarmTables>>>,
    fact_sequence: AtomicU64,
}

impl InMemoryEnvironment {
    pub fn new(config: &EnvironmentConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            decay: DecayLaw::from_config(config),
            min_strength: config.min_strength,
            swarms: RwLock::new(HashMap::new()),
            fact_sequence: AtomicU64::new(0),
        }
    }

    /// Environment on the wall clock with default decay settings.
    pub fn with_defaults() -> Self {
        Self::new(&EnvironmentConfig::default(), Arc::new(SystemClock))
    }

    pub fn decay_law(&self) -> DecayLaw {
        self.decay
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Raw stored `(strength, last_updated_at)` for a concept, without decay.
    pub fn stored_concept(&self, swarm: &SwarmId, name: &str) -> Option<Concept> {
        let tables = self.tables_if_present(swarm)?;
        let cell = tables.concepts.read().get(name).cloned()?;
        let concept = cell.lock().clone();
        Some(concept)
    }

    fn tables_if_present(&self, swarm: &SwarmId) -> Option<Arc<SwarmTables>> {
        self.swarms.read().get(swarm).cloned()
    }

    pub(crate) fn tables(&self, swarm: &SwarmId) -> Arc<SwarmTables> {
        if let Some(tables) = self.swarms.read().get(swarm) {
            return Arc::clone(tables);
        }
        let mut swarms = self.swarms.write();
        Arc::clone(swarms.entry(swarm.clone()).or_default())
    }

    pub(crate) fn swarm_ids(&self) -> Vec<SwarmId> {
        self.swarms.read().keys().cloned().collect()
    }

    fn concept_cell(&self, tables: &SwarmTables, name: &str) -> ConceptCell {
        if let Some(cell) = tables.concepts.read().get(name) {
            return Arc::clone(cell);
        }
        let mut concepts = tables.concepts.write();
        let cell = concepts.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Concept {
                name: name.to_string(),
                strength: 0.0,
                last_updated_at: self.clock.now(),
            }))
        });
        Arc::clone(cell)
    }

    fn topic_log(&self, tables: &SwarmTables, topic: &str) -> TopicLog {
        if let Some(log) = tables.facts.read().get(topic) {
            return Arc::clone(log);
        }
        let mut facts = tables.facts.write();
        Arc::clone(facts.entry(topic.to_string()).or_default())
    }

    fn read_concept(&self, cell: &ConceptCell, now: DateTime<Utc>) -> ConceptReading {
        let concept = cell.lock();
        ConceptReading {
            name: concept.name.clone(),
            strength: self.decay.apply(concept.strength, concept.last_updated_at, now),
            last_updated_at: concept.last_updated_at,
        }
    }

    pub(crate) fn insert_concept(&self, swarm: &SwarmId, concept: Concept) {
        let tables = self.tables(swarm);
        tables
            .concepts
            .write()
            .insert(concept.name.clone(), Arc::new(Mutex::new(concept)));
    }

    pub(crate) fn insert_fact(&self, swarm: &SwarmId, fact: Fact) {
        let tables = self.tables(swarm);
        let log = self.topic_log(&tables, &fact.topic);
        self.fact_sequence
            .fetch_max(fact.sequence.saturating_add(1), Ordering::SeqCst);
        log.write().push(fact);
    }

    pub(crate) fn insert_task(&self, swarm: &SwarmId, task: Task) {
        self.tables(swarm).tasks.lock().push(task);
    }
}

#[async_trait]
impl Environment for InMemoryEnvironment {
    async fn reinforce(&self, swarm: &SwarmId, name: &str, delta: f64) -> Result<f64, StoreError> {
        if !(delta > 0.0 && delta.is_finite()) {
            return Err(StoreError::InvalidDelta { delta });
        }
        let tables = self.tables(swarm);
        let cell = self.concept_cell(&tables, name);

        let mut concept = cell.lock();
        let now = self.clock.now();
        let decayed = self
            .decay
            .apply(concept.strength, concept.last_updated_at, now);
        concept.strength = decayed + delta;
        concept.last_updated_at = now.max(concept.last_updated_at);
        let strength = concept.strength;
        drop(concept);

        trace!(swarm = %swarm, concept = name, delta, strength, "Concept reinforced");
        Ok(strength)
    }

    async fn strength_of(&self, swarm: &SwarmId, name: &str) -> Result<f64, StoreError> {
        let Some(tables) = self.tables_if_present(swarm) else {
            return Ok(0.0);
        };
        let cell = tables.concepts.read().get(name).cloned();
        Ok(match cell {
            Some(cell) => self.read_concept(&cell, self.clock.now()).strength,
            None => 0.0,
        })
    }

    async fn top_concepts(
        &self,
        swarm: &SwarmId,
        k: usize,
    ) -> Result<Vec<ConceptReading>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(tables) = self.tables_if_present(swarm) else {
            return Ok(Vec::new());
        };
        let cells: Vec<ConceptCell> = tables.concepts.read().values().cloned().collect();

        // One instant for every concept, so the ranking is consistent.
        let now = self.clock.now();
        let mut readings: Vec<ConceptReading> = cells
            .iter()
            .map(|cell| self.read_concept(cell, now))
            .filter(|r| r.strength > self.min_strength)
            .collect();
        readings.sort_by(strongest_first);
        readings.truncate(k);
        Ok(readings)
    }

    async fn add_fact(
        &self,
        swarm: &SwarmId,
        topic: &str,
        content: &str,
        source_agent_id: &str,
    ) -> Result<FactId, StoreError> {
        let tables = self.tables(swarm);
        let log = self.topic_log(&tables, topic);

        let mut entries = log.write();
        let fact = Fact {
            id: FactId::generate(),
            topic: topic.to_string(),
            content: content.to_string(),
            source_agent_id: source_agent_id.to_string(),
            created_at: self.clock.now(),
            sequence: self.fact_sequence.fetch_add(1, Ordering::SeqCst),
        };
        let id = fact.id.clone();
        entries.push(fact);
        drop(entries);

        debug!(swarm = %swarm, topic, fact_id = %id, source = source_agent_id, "Fact published");
        Ok(id)
    }

    async fn get_facts(
        &self,
        swarm: &SwarmId,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<Fact>, StoreError> {
        let Some(tables) = self.tables_if_present(swarm) else {
            return Ok(Vec::new());
        };
        let Some(log) = tables.facts.read().get(topic).cloned() else {
            return Ok(Vec::new());
        };
        let mut facts = log.read().clone();
        facts.sort_by(newest_first);
        facts.truncate(limit);
        Ok(facts)
    }

    async fn search_facts(
        &self,
        swarm: &SwarmId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Fact>, StoreError> {
        let Some(tables) = self.tables_if_present(swarm) else {
            return Ok(Vec::new());
        };
        let needle = query.to_lowercase();
        let logs: Vec<TopicLog> = tables.facts.read().values().cloned().collect();

        let mut matches: Vec<Fact> = Vec::new();
        for log in logs {
            matches.extend(
                log.read()
                    .iter()
                    .filter(|f| f.content.to_lowercase().contains(&needle))
                    .cloned(),
            );
        }
        matches.sort_by(newest_first);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn post_task(
        &self,
        swarm: &SwarmId,
        description: &str,
        source_agent_id: &str,
    ) -> Result<TaskId, StoreError> {
        let tables = self.tables(swarm);
        let task = Task {
            id: TaskId::generate(),
            description: description.to_string(),
            source_agent_id: source_agent_id.to_string(),
            created_at: self.clock.now(),
            status: TaskStatus::Open,
        };
        let id = task.id.clone();
        tables.tasks.lock().push(task);
        debug!(swarm = %swarm, task_id = %id, source = source_agent_id, "Task posted");
        Ok(id)
    }

    async fn open_tasks(&self, swarm: &SwarmId, limit: usize) -> Result<Vec<Task>, StoreError> {
        let Some(tables) = self.tables_if_present(swarm) else {
            return Ok(Vec::new());
        };
        let tasks = tables.tasks.lock();
        let mut open: Vec<Task> = tasks.iter().filter(|t| t.is_open()).cloned().collect();
        drop(tasks);
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        open.truncate(limit);
        Ok(open)
    }

    async fn complete_task(
        &self,
        swarm: &SwarmId,
        task_id: &TaskId,
        agent_id: &str,
    ) -> Result<bool, StoreError> {
        let not_found = || StoreError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        };
        let tables = self.tables_if_present(swarm).ok_or_else(not_found)?;
        let mut tasks = tables.tasks.lock();
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == task_id)
            .ok_or_else(not_found)?;

        if !task.is_open() {
            return Ok(false);
        }
        task.status = TaskStatus::Completed {
            by: agent_id.to_string(),
            at: self.clock.now(),
        };
        debug!(swarm = %swarm, task_id = %task_id, agent = agent_id, "Task completed");
        Ok(true)
    }
}
