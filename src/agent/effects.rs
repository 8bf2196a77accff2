//! Environment writes implied by a tool result.
//!
//! A successful result may carry
//! `{"facts": [{"topic": .., "content": ..}], "reinforce": ["name" | {"concept": .., "delta": ..}]}`.
//! Malformed entries are skipped.

use serde_json::Value;
use tracing::warn;

use crate::checkpoint::{ToolOutcome, ToolResult};
use crate::environment::{Environment, SwarmId};
use crate::errors::StoreError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub facts: Vec<(String, String)>,
    pub reinforcements: Vec<(String, f64)>,
}

impl Effects {
    pub fn from_result(result: &ToolResult) -> Self {
        match &result.outcome {
            ToolOutcome::Success(value) => Self::from_output(value),
            ToolOutcome::Failure(_) => Self::default(),
        }
    }

    pub fn from_output(output: &Value) -> Self {
        let mut effects = Self::default();

        if let Some(facts) = output.get("facts").and_then(Value::as_array) {
            for entry in facts {
                let topic = entry.get("topic").and_then(Value::as_str);
                let content = entry.get("content").and_then(Value::as_str);
                if let (Some(topic), Some(content)) = (topic, content) {
                    effects.facts.push((topic.to_string(), content.to_string()));
                }
            }
        }

        if let Some(items) = output.get("reinforce").and_then(Value::as_array) {
            for item in items {
                let parsed = match item {
                    Value::String(name) => Some((name.clone(), 1.0)),
                    Value::Object(_) => item
                        .get("concept")
                        .and_then(Value::as_str)
                        .map(|name| {
                            let delta = item.get("delta").and_then(Value::as_f64).unwrap_or(1.0);
                            (name.to_string(), delta)
                        }),
                    _ => None,
                };
                match parsed {
                    Some((name, delta)) if delta > 0.0 && delta.is_finite() => {
                        effects.reinforcements.push((name, delta))
                    }
                    Some((name, delta)) => {
                        warn!(concept = %name, delta, "Ignoring non-positive reinforcement")
                    }
                    None => {}
                }
            }
        }

        effects
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.reinforcements.is_empty()
    }

    pub async fn apply(
        &self,
        env: &dyn Environment,
        swarm: &SwarmId,
        agent_id: &str,
    ) -> Result<(), StoreError> {
        for (topic, content) in &self.facts {
            env.add_fact(swarm, topic, content, agent_id).await?;
        }
        for (concept, delta) in &self.reinforcements {
            env.reinforce(swarm, concept, *delta).await?;
        }
        Ok(())
    }
}
