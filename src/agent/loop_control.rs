use chrono::{DateTime, Utc};

use crate::checkpoint::{AgentCheckpoint, Phase, Termination};
use crate::errors::AgentError;

/// Edges of the Reason -> Act -> Observe -> Reflect machine. Any live phase
/// may also jump to `Done` (cancellation) or `Failed` (store budget).
pub fn can_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;
    match (from, to) {
        (Done | Failed, _) => false,
        (_, Done | Failed) => true,
        (Reasoning, Acting | Reflecting) => true,
        (Acting, Observing) => true,
        (Observing, Reasoning | Reflecting) => true,
        _ => false,
    }
}

/// Move `checkpoint` to `to`, stamping `updated_at`.
pub fn transition(
    checkpoint: &mut AgentCheckpoint,
    to: Phase,
    now: DateTime<Utc>,
) -> Result<(), AgentError> {
    if !can_transition(checkpoint.phase, to) {
        return Err(AgentError::InvalidTransition {
            from: checkpoint.phase.to_string(),
            to: to.to_string(),
        });
    }
    checkpoint.phase = to;
    checkpoint.updated_at = now.max(checkpoint.updated_at);
    Ok(())
}

/// Bounds the Reasoning/Acting/Observing cycle.
#[derive(Debug, Clone, Copy)]
pub struct StepBudget {
    max_steps: u32,
}

impl StepBudget {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }

    pub fn exhausted(&self, checkpoint: &AgentCheckpoint) -> bool {
        checkpoint.step >= self.max_steps
    }

    /// Route a checkpoint whose budget ran out to `Reflecting`.
    pub fn force_reflect(
        &self,
        checkpoint: &mut AgentCheckpoint,
        now: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        checkpoint.termination = Some(Termination::BudgetExhausted);
        checkpoint.pending_action = None;
        transition(checkpoint, Phase::Reflecting, now)
    }
}
