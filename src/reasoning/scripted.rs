use async_trait::async_trait;
use std::collections::HashMap;

use super::{Decision, EnvironmentView, Reasoner};
use crate::checkpoint::{Message, Role};
use crate::errors::ReasoningError;

/// Deterministic reasoner driven by a per-goal script.
///
/// The decision depends only on how many tool observations the context
/// already holds: the n-th observation advances to the n-th scripted entry.
/// Past the end of the script it answers with the latest observation, so two
/// runs over the same context always decide the same thing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReasoner {
    scripts: HashMap<String, Vec<Decision>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, goal: impl Into<String>, decisions: Vec<Decision>) -> Self {
        self.scripts.insert(goal.into(), decisions);
        self
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn decide(
        &self,
        goal: &str,
        context: &[Message],
        _view: &EnvironmentView,
    ) -> Result<Decision, ReasoningError> {
        let observed = context.iter().filter(|m| m.role == Role::Tool).count();
        if let Some(decision) = self.scripts.get(goal).and_then(|s| s.get(observed)) {
            return Ok(decision.clone());
        }
        let answer = context
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| format!("No plan for: {}", goal));
        Ok(Decision::answer(answer))
    }
}
