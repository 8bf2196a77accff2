//! Agent Control Loop
//!
//! One agent session is a sequential Reason -> Act -> Observe -> Reflect
//! state machine whose full state lives in an [`AgentCheckpoint`]. Every
//! phase change is persisted before the next step runs, so a session can be
//! killed at any point and resumed from the same `(agent_id, session_id)`.
//!
//! - `Reasoning` consults the reasoner with a fresh environment snapshot
//! - `Acting` invokes the pending tool call; failures become observations
//! - `Observing` records the result and writes its implied effects
//! - `Reflecting` publishes a summary fact and reinforces concepts

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::capability::{CallContext, CapabilityLayer};
use crate::checkpoint::{
    AgentCheckpoint, CheckpointStore, Message, Phase, Termination, ToolOutcome, ToolResult,
};
use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::environment::{Environment, SwarmId};
use crate::errors::{AgentError, StigmerError, StoreError};
use crate::reasoning::{Decision, EnvironmentView, Reasoner, Reflection};
use crate::supervision::retry_with_backoff;
use crate::telemetry::{sanitize_for_log, step_span};

pub mod effects;
pub mod loop_control;

use effects::Effects;
use loop_control::{transition, StepBudget};

const REFLECT_EFFECTS_KEY: &str = "reflect";

/// Identity and goal of one agent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub agent_id: String,
    pub session_id: String,
    pub goal: String,
    /// Topic of the reflection fact; defaults to the session id.
    pub task_id: String,
}

impl AgentSpec {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            agent_id: agent_id.into(),
            task_id: session_id.clone(),
            session_id,
            goal: goal.into(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

/// Cooperative cancellation, observed between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared collaborators of an agent loop.
#[derive(Clone)]
pub struct AgentRuntime {
    pub swarm_id: SwarmId,
    pub config: AgentConfig,
    pub env: Arc<dyn Environment>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub capabilities: Arc<dyn CapabilityLayer>,
    pub reasoner: Arc<dyn Reasoner>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct AgentLoop {
    spec: AgentSpec,
    runtime: AgentRuntime,
    budget: StepBudget,
    cancel: CancelHandle,
}

impl AgentLoop {
    pub fn new(spec: AgentSpec, runtime: AgentRuntime) -> Self {
        let budget = StepBudget::new(runtime.config.max_steps);
        Self {
            spec,
            runtime,
            budget,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn call_context(&self) -> CallContext {
        CallContext::new(&self.spec.agent_id, self.runtime.swarm_id.clone())
    }

    /// Drive the session to a terminal checkpoint, resuming from a persisted
    /// one when it exists.
    pub async fn run(&self) -> Result<AgentCheckpoint, StigmerError> {
        let mut checkpoint = self.resume_or_start().await?;
        let mut store_failures = 0u32;

        while !checkpoint.is_terminal() {
            if self.cancel.is_cancelled() {
                self.finish_cancelled(&mut checkpoint).await?;
                break;
            }

            let span = step_span(&checkpoint);
            match self.step(&mut checkpoint).instrument(span).await {
                Ok(()) => store_failures = 0,
                Err(StigmerError::Store(e)) => {
                    store_failures += 1;
                    if store_failures > self.runtime.config.store_retry_budget {
                        self.finish_failed(&mut checkpoint, &e).await?;
                        break;
                    }
                    let wait = self.runtime.config.store_backoff.duration(store_failures - 1);
                    warn!(
                        agent_id = %self.spec.agent_id,
                        session_id = %self.spec.session_id,
                        phase = %checkpoint.phase,
                        attempt = store_failures,
                        error = %e,
                        "Store unavailable, step will be retried"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            agent_id = %checkpoint.agent_id,
            session_id = %checkpoint.session_id,
            phase = %checkpoint.phase,
            steps = checkpoint.step,
            termination = ?checkpoint.termination,
            "Session finished"
        );
        Ok(checkpoint)
    }

    /// Load the session's checkpoint or create and persist a fresh one.
    pub async fn resume_or_start(&self) -> Result<AgentCheckpoint, StigmerError> {
        let config = &self.runtime.config;
        let store = &self.runtime.checkpoints;
        let (agent_id, session_id) = (&self.spec.agent_id, &self.spec.session_id);

        let loaded = retry_with_backoff(
            "checkpoint_load",
            config.store_retry_budget,
            &config.store_backoff,
            StoreError::is_transient,
            move || store.load(agent_id, session_id),
        )
        .await?;

        match loaded {
            Some(checkpoint) => {
                checkpoint
                    .validate()
                    .map_err(|reason| AgentError::CorruptCheckpoint {
                        agent_id: agent_id.clone(),
                        session_id: session_id.clone(),
                        reason,
                    })?;
                if checkpoint.goal != self.spec.goal {
                    warn!(agent_id = %agent_id, session_id = %session_id, "Resumed checkpoint has a different goal; keeping the persisted one");
                }
                info!(
                    agent_id = %agent_id,
                    session_id = %session_id,
                    phase = %checkpoint.phase,
                    step = checkpoint.step,
                    "Resuming session from checkpoint"
                );
                Ok(checkpoint)
            }
            None => {
                let checkpoint = AgentCheckpoint::new(
                    agent_id.clone(),
                    session_id.clone(),
                    self.runtime.swarm_id.clone(),
                    self.spec.task_id.clone(),
                    self.spec.goal.clone(),
                    self.runtime.clock.now(),
                );
                self.save_with_retry(&checkpoint).await?;
                info!(agent_id = %agent_id, session_id = %session_id, "Starting new session");
                Ok(checkpoint)
            }
        }
    }

    /// Run exactly one phase and persist the result. `checkpoint` is only
    /// replaced once the new state has been saved, so on error it still
    /// holds the last persisted state.
    pub async fn step(&self, checkpoint: &mut AgentCheckpoint) -> Result<(), StigmerError> {
        if checkpoint.is_terminal() {
            return Err(AgentError::AlreadyTerminated {
                agent_id: checkpoint.agent_id.clone(),
                session_id: checkpoint.session_id.clone(),
                phase: checkpoint.phase.to_string(),
            }
            .into());
        }

        match checkpoint.phase {
            Phase::Reasoning => self.reason(checkpoint).await,
            Phase::Acting => self.act(checkpoint).await,
            Phase::Observing => self.observe(checkpoint).await,
            Phase::Reflecting => self.reflect(checkpoint).await,
            Phase::Done | Phase::Failed => Ok(()),
        }
    }

    async fn commit(
        &self,
        checkpoint: &mut AgentCheckpoint,
        next: AgentCheckpoint,
    ) -> Result<(), StigmerError> {
        self.runtime.checkpoints.save(&next).await?;
        debug!(
            agent_id = %next.agent_id,
            session_id = %next.session_id,
            from = %checkpoint.phase,
            to = %next.phase,
            "Checkpoint committed"
        );
        *checkpoint = next;
        Ok(())
    }

    async fn reason(&self, checkpoint: &mut AgentCheckpoint) -> Result<(), StigmerError> {
        let now = self.runtime.clock.now();
        let mut next = checkpoint.clone();

        if self.budget.exhausted(&next) {
            self.budget.force_reflect(&mut next, now)?;
            return self.commit(checkpoint, next).await;
        }

        if next.conversation_context.is_empty() {
            next.conversation_context
                .push(Message::user(next.goal.clone(), now));
        }

        let view = EnvironmentView::capture(
            self.runtime.env.as_ref(),
            &next.swarm_id,
            &next.task_id,
            &self.runtime.config,
        )
        .await?;

        let reasoner = &self.runtime.reasoner;
        let (goal, context, view) = (&next.goal, &next.conversation_context, &view);
        let decision = retry_with_backoff(
            "reasoning",
            self.runtime.config.reasoning_retries,
            &self.runtime.config.reasoning_backoff,
            |_| true,
            move || reasoner.decide(goal, context, view),
        )
        .await;

        let now = self.runtime.clock.now();
        match decision {
            Ok(Decision::Call(call)) => {
                debug!(
                    agent_id = %next.agent_id,
                    tool = %sanitize_for_log(&call.tool),
                    call_id = %call.id,
                    "Reasoner chose a tool call"
                );
                let mut message = Message::assistant(
                    format!("Calling {} with {}", call.tool, call.args),
                    now,
                );
                message.tool_call_id = Some(call.id.clone());
                next.conversation_context.push(message);
                next.pending_action = Some(call);
                transition(&mut next, Phase::Acting, now)?;
            }
            Ok(Decision::Answer { text }) => {
                next.conversation_context
                    .push(Message::assistant(text.clone(), now));
                next.final_answer = Some(text);
                next.termination = Some(Termination::Answered);
                transition(&mut next, Phase::Reflecting, now)?;
            }
            Err(e) => {
                warn!(
                    agent_id = %next.agent_id,
                    session_id = %next.session_id,
                    error = %e,
                    "Reasoning retries exhausted"
                );
                next.conversation_context
                    .push(Message::assistant(format!("Reasoning unavailable: {}", e), now));
                next.termination = Some(Termination::ReasoningUnavailable);
                transition(&mut next, Phase::Reflecting, now)?;
            }
        }

        self.commit(checkpoint, next).await
    }

    async fn act(&self, checkpoint: &mut AgentCheckpoint) -> Result<(), StigmerError> {
        let call = checkpoint
            .pending_action
            .clone()
            .ok_or_else(|| self.corrupt(checkpoint, "acting without a pending action"))?;

        let outcome = match self
            .runtime
            .capabilities
            .invoke(&self.call_context(), &call.tool, call.args.clone())
            .await
        {
            Ok(value) => ToolOutcome::Success(value),
            Err(e) => {
                warn!(
                    agent_id = %checkpoint.agent_id,
                    tool = %sanitize_for_log(&call.tool),
                    error = %e,
                    "Capability failed; feeding failure back as an observation"
                );
                ToolOutcome::Failure(e.to_string())
            }
        };

        let mut next = checkpoint.clone();
        next.last_result = Some(ToolResult {
            call_id: call.id,
            tool: call.tool,
            outcome,
        });
        transition(&mut next, Phase::Observing, self.runtime.clock.now())?;
        self.commit(checkpoint, next).await
    }

    async fn observe(&self, checkpoint: &mut AgentCheckpoint) -> Result<(), StigmerError> {
        let result = checkpoint
            .last_result
            .clone()
            .ok_or_else(|| self.corrupt(checkpoint, "observing without a tool result"))?;

        let key = format!("observe:{}", checkpoint.step);
        if checkpoint.applied_effects.as_deref() != Some(key.as_str()) {
            let effects = Effects::from_result(&result);
            if !effects.is_empty() {
                effects
                    .apply(
                        self.runtime.env.as_ref(),
                        &checkpoint.swarm_id,
                        &checkpoint.agent_id,
                    )
                    .await?;
                let mut marked = checkpoint.clone();
                marked.applied_effects = Some(key);
                self.commit(checkpoint, marked).await?;
            }
        }

        let now = self.runtime.clock.now();
        let mut next = checkpoint.clone();
        next.conversation_context
            .push(Message::tool(result.call_id.clone(), result.observation(), now));
        next.pending_action = None;
        next.last_result = None;
        next.step += 1;

        if self.budget.exhausted(&next) {
            info!(agent_id = %next.agent_id, steps = next.step, "Step budget exhausted");
            self.budget.force_reflect(&mut next, now)?;
        } else {
            transition(&mut next, Phase::Reasoning, now)?;
        }
        self.commit(checkpoint, next).await
    }

    async fn reflect(&self, checkpoint: &mut AgentCheckpoint) -> Result<(), StigmerError> {
        if checkpoint.applied_effects.as_deref() != Some(REFLECT_EFFECTS_KEY) {
            let answer = checkpoint.final_answer.as_deref();
            let reflection = match self
                .runtime
                .reasoner
                .reflect(&checkpoint.goal, &checkpoint.conversation_context, answer)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(agent_id = %checkpoint.agent_id, error = %e, "Reflection failed, using plain summary");
                    Reflection::summarize(&checkpoint.goal, &checkpoint.conversation_context, answer)
                }
            };

            let env = &self.runtime.env;
            env.add_fact(
                &checkpoint.swarm_id,
                &checkpoint.task_id,
                &reflection.summary,
                &checkpoint.agent_id,
            )
            .await?;
            for concept in reflection.concepts.iter().filter(|c| !c.is_empty()) {
                env.reinforce(
                    &checkpoint.swarm_id,
                    concept,
                    self.runtime.config.reflection_weight,
                )
                .await?;
            }

            let mut marked = checkpoint.clone();
            marked.applied_effects = Some(REFLECT_EFFECTS_KEY.to_string());
            self.commit(checkpoint, marked).await?;
        }

        let mut next = checkpoint.clone();
        next.termination.get_or_insert(Termination::Answered);
        transition(&mut next, Phase::Done, self.runtime.clock.now())?;
        self.commit(checkpoint, next).await
    }

    async fn finish_cancelled(&self, checkpoint: &mut AgentCheckpoint) -> Result<(), StigmerError> {
        let mut next = checkpoint.clone();
        next.termination = Some(Termination::Cancelled);
        transition(&mut next, Phase::Done, self.runtime.clock.now())?;
        self.save_with_retry(&next).await?;
        info!(agent_id = %next.agent_id, session_id = %next.session_id, "Session cancelled");
        *checkpoint = next;
        Ok(())
    }

    async fn finish_failed(
        &self,
        checkpoint: &mut AgentCheckpoint,
        cause: &StoreError,
    ) -> Result<(), StigmerError> {
        let mut next = checkpoint.clone();
        next.failure = Some(format!(
            "store unavailable after {} retries in {}: {}",
            self.runtime.config.store_retry_budget, checkpoint.phase, cause
        ));
        transition(&mut next, Phase::Failed, self.runtime.clock.now())?;
        self.save_with_retry(&next).await?;
        warn!(agent_id = %next.agent_id, session_id = %next.session_id, "Session failed");
        *checkpoint = next;
        Ok(())
    }

    async fn save_with_retry(&self, checkpoint: &AgentCheckpoint) -> Result<(), StoreError> {
        let config = &self.runtime.config;
        let store = &self.runtime.checkpoints;
        retry_with_backoff(
            "checkpoint_save",
            config.store_retry_budget,
            &config.store_backoff,
            StoreError::is_transient,
            move || store.save(checkpoint),
        )
        .await
    }

    fn corrupt(&self, checkpoint: &AgentCheckpoint, reason: &str) -> AgentError {
        AgentError::CorruptCheckpoint {
            agent_id: checkpoint.agent_id.clone(),
            session_id: checkpoint.session_id.clone(),
            reason: reason.to_string(),
        }
    }
}
