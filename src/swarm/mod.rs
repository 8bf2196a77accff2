//! Swarm Driver
//!
//! Starts one supervised task per agent and waits for all of them. Agents
//! never talk to each other; any coordination happens through the shared
//! environment. A crashed agent (panic or step error) is restarted under the
//! configured [`RestartPolicy`] and resumes from its persisted checkpoint.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::agent::{AgentLoop, AgentRuntime, AgentSpec, CancelHandle};
use crate::capability::{builtin, CapabilityLayer, CapabilityRegistry, DisabledCapabilities};
use crate::checkpoint::{
    AgentCheckpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Phase,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AgentConfig, Config};
use crate::environment::{Environment, InMemoryEnvironment, SwarmId};
use crate::errors::{AgentError, StigmerError};
use crate::reasoning::Reasoner;
use crate::supervision::{ExitReason, RestartPolicy, RestartTracker};

/// Outcome of one agent within a swarm run.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub agent_id: String,
    pub session_id: String,
    pub final_answer: Option<String>,
    /// Terminal checkpoint, when the agent got that far.
    pub checkpoint: Option<AgentCheckpoint>,
    pub restarts: u32,
    /// Last error when the agent gave up without a terminal checkpoint.
    pub error: Option<String>,
    pub disabled: bool,
}

impl AgentReport {
    fn not_started(spec: &AgentSpec, disabled: bool, error: &str) -> Self {
        Self {
            agent_id: spec.agent_id.clone(),
            session_id: spec.session_id.clone(),
            final_answer: None,
            checkpoint: None,
            restarts: 0,
            error: Some(error.to_string()),
            disabled,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.checkpoint.as_ref().map(|cp| cp.phase)
    }

    pub fn is_done(&self) -> bool {
        self.phase() == Some(Phase::Done)
    }
}

#[derive(Debug, Clone)]
pub struct SwarmResult {
    pub swarm_id: SwarmId,
    /// One report per input spec, in the order the specs were given.
    pub reports: Vec<AgentReport>,
    pub duration: Duration,
}

impl SwarmResult {
    pub fn report(&self, agent_id: &str, session_id: &str) -> Option<&AgentReport> {
        self.reports
            .iter()
            .find(|r| r.agent_id == agent_id && r.session_id == session_id)
    }

    /// Every session run by `agent_id`, in input order.
    pub fn reports_for<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a AgentReport> {
        self.reports.iter().filter(move |r| r.agent_id == agent_id)
    }

    /// Final answers keyed by `(agent_id, session_id)`.
    pub fn answers(&self) -> HashMap<(&str, &str), &str> {
        self.reports
            .iter()
            .filter_map(|r| {
                let answer = r.final_answer.as_deref()?;
                Some(((r.agent_id.as_str(), r.session_id.as_str()), answer))
            })
            .collect()
    }

    pub fn all_done(&self) -> bool {
        self.reports.iter().all(AgentReport::is_done)
    }

    /// Agents that ended `Failed` or never reached a terminal checkpoint.
    pub fn failed(&self) -> Vec<&AgentReport> {
        self.reports
            .iter()
            .filter(|r| r.phase() != Some(Phase::Done))
            .collect()
    }
}

pub struct SwarmDriver {
    swarm_id: SwarmId,
    agent_config: AgentConfig,
    restart_policy: RestartPolicy,
    env: Arc<dyn Environment>,
    checkpoints: Arc<dyn CheckpointStore>,
    capabilities: Arc<dyn CapabilityLayer>,
    reasoner: Arc<dyn Reasoner>,
    clock: Arc<dyn Clock>,
    cancel: CancelHandle,
    snapshot: Option<(Arc<InMemoryEnvironment>, PathBuf)>,
}

impl SwarmDriver {
    pub fn new(
        config: &Config,
        env: Arc<dyn Environment>,
        checkpoints: Arc<dyn CheckpointStore>,
        capabilities: Arc<dyn CapabilityLayer>,
        reasoner: Arc<dyn Reasoner>,
    ) -> Self {
        Self {
            swarm_id: SwarmId::new(config.swarm.swarm_id.clone()),
            agent_config: config.agent.clone(),
            restart_policy: RestartPolicy {
                max_restarts: config.swarm.max_restarts,
                backoff: config.swarm.restart_backoff.clone(),
            },
            env,
            checkpoints,
            capabilities,
            reasoner,
            clock: Arc::new(SystemClock),
            cancel: CancelHandle::new(),
            snapshot: None,
        }
    }

    /// Wire a driver from configuration: an in-memory environment (restored
    /// from `persistence.environment_path` when set), file or in-memory
    /// checkpoints, and `registry` extended with the environment capabilities.
    pub fn from_config(
        config: &Config,
        reasoner: Arc<dyn Reasoner>,
        mut registry: CapabilityRegistry,
    ) -> Result<Self, StigmerError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let env = match &config.persistence.environment_path {
            Some(path) => {
                InMemoryEnvironment::load_snapshot(path, &config.environment, Arc::clone(&clock))?
            }
            None => InMemoryEnvironment::new(&config.environment, Arc::clone(&clock)),
        };
        let env = Arc::new(env);

        let checkpoints: Arc<dyn CheckpointStore> = match &config.persistence.checkpoint_dir {
            Some(dir) => Arc::new(FileCheckpointStore::new(dir)?),
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        builtin::register_environment(&mut registry, env.clone());
        let registry = registry.with_timeout(config.agent.capability_timeout());

        let mut driver = Self::new(
            config,
            env.clone(),
            checkpoints,
            Arc::new(registry),
            reasoner,
        )
        .with_clock(clock);
        driver.snapshot = config
            .persistence
            .environment_path
            .clone()
            .map(|path| (env, path));
        Ok(driver)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn swarm_id(&self) -> &SwarmId {
        &self.swarm_id
    }

    pub fn environment(&self) -> Arc<dyn Environment> {
        Arc::clone(&self.env)
    }

    pub fn checkpoints(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.checkpoints)
    }

    /// Cancels every agent of the current and later runs between steps.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn runtime_for(&self, disabled: bool) -> AgentRuntime {
        let capabilities: Arc<dyn CapabilityLayer> = if disabled {
            Arc::new(DisabledCapabilities)
        } else {
            Arc::clone(&self.capabilities)
        };
        AgentRuntime {
            swarm_id: self.swarm_id.clone(),
            config: self.agent_config.clone(),
            env: Arc::clone(&self.env),
            checkpoints: Arc::clone(&self.checkpoints),
            capabilities,
            reasoner: Arc::clone(&self.reasoner),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Run every agent to completion. Agents listed in `disabled` start
    /// normally but all their capability calls fail.
    pub async fn run(&self, agents: Vec<AgentSpec>, disabled: &HashSet<String>) -> SwarmResult {
        let start = Instant::now();
        let specs = agents.clone();
        info!(
            swarm_id = %self.swarm_id,
            agents = agents.len(),
            disabled = disabled.len(),
            "Starting swarm"
        );

        let mut slots: Vec<Option<AgentReport>> = Vec::with_capacity(agents.len());
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut running = FuturesUnordered::new();
        for (index, spec) in agents.into_iter().enumerate() {
            let is_disabled = disabled.contains(&spec.agent_id);
            if !seen.insert((spec.agent_id.clone(), spec.session_id.clone())) {
                warn!(
                    agent_id = %spec.agent_id,
                    session_id = %spec.session_id,
                    "Duplicate session in swarm input, not started"
                );
                slots.push(Some(AgentReport::not_started(
                    &spec,
                    is_disabled,
                    "duplicate (agent_id, session_id) in swarm input",
                )));
                continue;
            }
            slots.push(None);

            let agent = AgentLoop::new(spec, self.runtime_for(is_disabled))
                .with_cancel(self.cancel.clone());
            let policy = self.restart_policy.clone();
            let handle = tokio::spawn(supervise(agent, policy, is_disabled));
            running.push(async move { (index, handle.await) });
        }

        while let Some((index, joined)) = running.next().await {
            match joined {
                Ok(report) => slots[index] = Some(report),
                Err(e) => error!(index, error = %e, "Agent supervisor task failed"),
            }
        }

        if let Some((env, path)) = &self.snapshot {
            if let Err(e) = env.save_snapshot(path) {
                warn!(path = %path.display(), error = %e, "Failed to save environment snapshot");
            }
        }

        let reports: Vec<AgentReport> = slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    AgentReport::not_started(
                        &spec,
                        disabled.contains(&spec.agent_id),
                        "agent supervisor task failed",
                    )
                })
            })
            .collect();
        let duration = start.elapsed();
        info!(
            swarm_id = %self.swarm_id,
            done = reports.iter().filter(|r| r.is_done()).count(),
            total = reports.len(),
            duration_ms = duration.as_millis() as u64,
            "Swarm finished"
        );

        SwarmResult {
            swarm_id: self.swarm_id.clone(),
            reports,
            duration,
        }
    }
}

/// Run one agent, restarting it after crashes until it reaches a terminal
/// checkpoint or runs out of restarts.
async fn supervise(agent: AgentLoop, policy: RestartPolicy, disabled: bool) -> AgentReport {
    let spec = agent.spec().clone();
    let mut tracker = RestartTracker::new(policy);

    loop {
        let attempt = agent.clone();
        let outcome = tokio::spawn(async move { attempt.run().await }).await;

        let (reason, error) = match outcome {
            Ok(Ok(checkpoint)) => {
                return AgentReport {
                    agent_id: spec.agent_id.clone(),
                    session_id: spec.session_id.clone(),
                    final_answer: checkpoint.final_answer.clone(),
                    checkpoint: Some(checkpoint),
                    restarts: tracker.restarts(&spec.agent_id),
                    error: None,
                    disabled,
                };
            }
            Ok(Err(e)) => (ExitReason::Error, e.to_string()),
            Err(join) => (ExitReason::Panicked, panic_message(join)),
        };

        warn!(
            agent_id = %spec.agent_id,
            session_id = %spec.session_id,
            reason = ?reason,
            error = %error,
            "Agent exited abnormally"
        );

        match tracker.on_exit(&spec.agent_id, reason) {
            Some(backoff) => tokio::time::sleep(backoff).await,
            None => {
                error!(agent_id = %spec.agent_id, "Giving up on agent");
                return AgentReport {
                    agent_id: spec.agent_id.clone(),
                    session_id: spec.session_id.clone(),
                    final_answer: None,
                    checkpoint: None,
                    restarts: tracker.restarts(&spec.agent_id),
                    error: Some(error),
                    disabled,
                };
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    AgentError::Panic(message).to_string()
}
