//! Capabilities that expose the shared environment to the reasoner.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{CallContext, Capability, CapabilityRegistry};
use crate::environment::{Environment, TaskId};

const DEFAULT_LIMIT: usize = 10;

/// Register every environment capability on `registry`.
pub fn register_environment(registry: &mut CapabilityRegistry, env: Arc<dyn Environment>) {
    registry.register(AddFact(Arc::clone(&env)));
    registry.register(GetFacts(Arc::clone(&env)));
    registry.register(SearchFacts(Arc::clone(&env)));
    registry.register(ReinforceConcept(Arc::clone(&env)));
    registry.register(StrongestConcepts(Arc::clone(&env)));
    registry.register(PostTask(Arc::clone(&env)));
    registry.register(OpenTasks(Arc::clone(&env)));
    registry.register(CompleteTask(env));
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("{} is required", key))
}

fn limit_arg(args: &Value, key: &str) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_LIMIT)
}

pub struct AddFact(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for AddFact {
    fn name(&self) -> &str {
        "add_fact"
    }

    fn description(&self) -> &str {
        "Publish a finding to the swarm's shared fact log under a topic"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "Exact topic key" },
                "content": { "type": "string", "description": "The finding" }
            },
            "required": ["topic", "content"]
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let topic = required_str(&args, "topic")?;
        let content = required_str(&args, "content")?;
        let id = self
            .0
            .add_fact(&ctx.swarm_id, topic, content, &ctx.agent_id)
            .await?;
        Ok(json!({ "fact_id": id, "topic": topic }))
    }
}

pub struct GetFacts(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for GetFacts {
    fn name(&self) -> &str {
        "get_facts"
    }

    fn description(&self) -> &str {
        "List facts published under an exact topic, most recent first"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string" },
                "limit": { "type": "integer", "minimum": 0 }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let topic = required_str(&args, "topic")?;
        let facts = self
            .0
            .get_facts(&ctx.swarm_id, topic, limit_arg(&args, "limit"))
            .await?;
        Ok(json!({ "results": facts_view(&facts) }))
    }
}

pub struct SearchFacts(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for SearchFacts {
    fn name(&self) -> &str {
        "search_facts"
    }

    fn description(&self) -> &str {
        "Case-insensitive keyword search over all published facts"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 0 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let query = required_str(&args, "query")?;
        let facts = self
            .0
            .search_facts(&ctx.swarm_id, query, limit_arg(&args, "limit"))
            .await?;
        Ok(json!({ "matches": facts_view(&facts) }))
    }
}

fn facts_view(facts: &[crate::environment::Fact]) -> Vec<Value> {
    facts
        .iter()
        .map(|f| {
            json!({
                "id": f.id,
                "topic": f.topic,
                "text": f.content,
                "source": f.source_agent_id,
                "created_at": f.created_at,
            })
        })
        .collect()
}

pub struct ReinforceConcept(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for ReinforceConcept {
    fn name(&self) -> &str {
        "reinforce_concept"
    }

    fn description(&self) -> &str {
        "Strengthen a concept's pheromone trail"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "concept": { "type": "string" },
                "delta": { "type": "number", "exclusiveMinimum": 0, "default": 1.0 }
            },
            "required": ["concept"]
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let concept = required_str(&args, "concept")?;
        let delta = args.get("delta").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let strength = self.0.reinforce(&ctx.swarm_id, concept, delta).await?;
        Ok(json!({ "concept": concept, "strength": strength }))
    }
}

pub struct StrongestConcepts(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for StrongestConcepts {
    fn name(&self) -> &str {
        "strongest_concepts"
    }

    fn description(&self) -> &str {
        "List the concepts with the strongest current trails"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "k": { "type": "integer", "minimum": 0, "default": 5 }
            }
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let k = args.get("k").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let top = self.0.top_concepts(&ctx.swarm_id, k).await?;
        let concepts: Vec<Value> = top
            .iter()
            .map(|c| json!({ "name": c.name, "strength": c.strength }))
            .collect();
        Ok(json!({ "concepts": concepts }))
    }
}

pub struct PostTask(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for PostTask {
    fn name(&self) -> &str {
        "post_task"
    }

    fn description(&self) -> &str {
        "Add a work item to the swarm's shared task board"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" }
            },
            "required": ["description"]
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let description = required_str(&args, "description")?;
        let id = self
            .0
            .post_task(&ctx.swarm_id, description, &ctx.agent_id)
            .await?;
        Ok(json!({ "task_id": id }))
    }
}

pub struct OpenTasks(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for OpenTasks {
    fn name(&self) -> &str {
        "open_tasks"
    }

    fn description(&self) -> &str {
        "List open work items on the task board, oldest first"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 0 }
            }
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let tasks = self
            .0
            .open_tasks(&ctx.swarm_id, limit_arg(&args, "limit"))
            .await?;
        let tasks: Vec<Value> = tasks
            .iter()
            .map(|t| json!({ "task_id": t.id, "description": t.description }))
            .collect();
        Ok(json!({ "tasks": tasks }))
    }
}

pub struct CompleteTask(pub Arc<dyn Environment>);

#[async_trait]
impl Capability for CompleteTask {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark a task on the board as completed"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value> {
        let task_id = TaskId::from(required_str(&args, "task_id")?);
        let completed = self
            .0
            .complete_task(&ctx.swarm_id, &task_id, &ctx.agent_id)
            .await?;
        Ok(json!({ "task_id": task_id, "completed": completed }))
    }
}
