//! Stigmer - a stigmergic agent swarm
//!
//! Agents never message each other. Each one runs its own
//! Reason → Act → Observe → Reflect loop and coordinates indirectly by
//! reading and writing a shared environment of decaying concept strengths,
//! topic-indexed facts and a task board.
//!
//! - **Environment**: lazily decayed concepts, append-only facts, open tasks
//! - **Agent loop**: checkpointed after every phase, resumable after a crash
//! - **Capabilities**: pluggable tools behind a registry
//! - **Swarm**: one supervised task per agent, restarted from its checkpoint
//!
//! # Quick Start
//!
//! ```ignore
//! use stigmer::{AgentSpec, CapabilityRegistry, Config, ScriptedReasoner, SwarmDriver};
//!
//! let config = Config::load(None)?;
//! let driver = SwarmDriver::from_config(&config, Arc::new(ScriptedReasoner::new()), CapabilityRegistry::new())?;
//! let result = driver.run(vec![AgentSpec::new("scout", "s1", "map the area")], &HashSet::new()).await;
//! ```

pub mod agent;
pub mod capability;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod environment;
pub mod errors;
pub mod reasoning;
pub mod supervision;
pub mod swarm;
pub mod telemetry;

pub use agent::{AgentLoop, AgentRuntime, AgentSpec, CancelHandle};
pub use capability::{
    CallContext, Capability, CapabilityLayer, CapabilityRegistry, DisabledCapabilities,
};
pub use checkpoint::{AgentCheckpoint, CheckpointStore, Phase, Termination};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use environment::{Environment, InMemoryEnvironment, SwarmId};
pub use errors::{Result, StigmerError};
pub use reasoning::{Decision, Reasoner, ScriptedReasoner};
pub use swarm::{AgentReport, SwarmDriver, SwarmResult};
