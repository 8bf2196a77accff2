//! Unit tests for the swarm driver
//!
//! Tests cover:
//! - Coordination through shared facts only
//! - Disabled agents still finishing `Done`
//! - Restart after a panicking agent task, and giving up
//! - Cancellation and report ordering
//! - Several sessions of one agent, and duplicate sessions
//! - File-backed persistence wired from configuration

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use stigmer::agent::AgentSpec;
use stigmer::capability::{builtin, CallContext, Capability, CapabilityRegistry};
use stigmer::checkpoint::{CheckpointStore, MemoryCheckpointStore, Phase, Termination, ToolCall};
use stigmer::clock::ManualClock;
use stigmer::config::Config;
use stigmer::environment::{Environment, InMemoryEnvironment, SwarmId};
use stigmer::reasoning::{Decision, ScriptedReasoner};
use stigmer::supervision::BackoffStrategy;
use stigmer::swarm::SwarmDriver;

/// Panics on its first `panics` calls, then reports a fixed finding.
struct Fragile {
    panics: u32,
    calls: AtomicU32,
}

impl Fragile {
    fn new(panics: u32) -> Self {
        Self {
            panics,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Capability for Fragile {
    fn name(&self) -> &str {
        "survey"
    }
    fn description(&self) -> &str {
        "Survey a patch of the orchard"
    }
    fn schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _ctx: &CallContext, _args: Value) -> anyhow::Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.panics {
            panic!("survey drone lost");
        }
        Ok(json!("north patch is ripe"))
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.swarm.swarm_id = "orchard".into();
    config.swarm.max_restarts = 2;
    config.swarm.restart_backoff = BackoffStrategy::none();
    config.agent.reasoning_backoff = BackoffStrategy::none();
    config.agent.store_backoff = BackoffStrategy::none();
    config
}

fn swarm() -> SwarmId {
    SwarmId::new("orchard")
}

fn add_fact_call(id: &str, content: &str) -> Vec<Decision> {
    vec![Decision::Call(ToolCall::with_id(
        id,
        "add_fact",
        json!({"topic": "fruit", "content": content}),
    ))]
}

fn driver(
    config: &Config,
    registry: CapabilityRegistry,
    reasoner: ScriptedReasoner,
) -> (SwarmDriver, Arc<InMemoryEnvironment>, Arc<MemoryCheckpointStore>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let env = Arc::new(InMemoryEnvironment::new(&config.environment, clock.clone()));
    let mut registry = registry;
    builtin::register_environment(&mut registry, env.clone());
    let store = Arc::new(MemoryCheckpointStore::new());
    let driver = SwarmDriver::new(
        config,
        env.clone(),
        store.clone(),
        Arc::new(registry),
        Arc::new(reasoner),
    )
    .with_clock(clock);
    (driver, env, store)
}

// ============================================================================
// Coordination
// ============================================================================

mod coordination_tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_agent_still_reaches_done() {
        let reasoner = ScriptedReasoner::new()
            .script("report apples", add_fact_call("c1", "apples"))
            .script("report pears", add_fact_call("c2", "pears"))
            .script("report plums", add_fact_call("c3", "plums"));
        let (driver, env, _store) = driver(&config(), CapabilityRegistry::new(), reasoner);

        let agents = vec![
            AgentSpec::new("a1", "s1", "report apples"),
            AgentSpec::new("a2", "s2", "report pears"),
            AgentSpec::new("a3", "s3", "report plums"),
        ];
        let disabled: HashSet<String> = ["a2".to_string()].into_iter().collect();
        let result = driver.run(agents, &disabled).await;

        assert!(result.all_done());
        assert!(result.failed().is_empty());
        let ids: Vec<&str> = result.reports.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);

        let a2 = result.report("a2", "s2").unwrap();
        assert!(a2.disabled);
        assert_eq!(a2.phase(), Some(Phase::Done));
        assert!(a2.final_answer.as_deref().unwrap().contains("disabled"));

        let mut published: Vec<String> = env
            .get_facts(&swarm(), "fruit", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.content)
            .collect();
        published.sort();
        assert_eq!(published, vec!["apples", "plums"]);
    }

    #[tokio::test]
    async fn test_later_agent_reads_earlier_findings() {
        let reasoner = ScriptedReasoner::new()
            .script("publish", add_fact_call("c1", "apples are ripe"))
            .script(
                "read",
                vec![Decision::Call(ToolCall::with_id(
                    "r1",
                    "get_facts",
                    json!({"topic": "fruit"}),
                ))],
            );
        let (driver, _env, _store) = driver(&config(), CapabilityRegistry::new(), reasoner);

        let writer = driver
            .run(vec![AgentSpec::new("writer", "s1", "publish")], &HashSet::new())
            .await;
        assert!(writer.all_done());

        let reader = driver
            .run(vec![AgentSpec::new("reader", "s2", "read")], &HashSet::new())
            .await;
        let answer = reader.answers().get(&("reader", "s2")).copied().unwrap().to_string();
        assert!(answer.contains("apples are ripe"), "answer was {}", answer);
    }
}

// ============================================================================
// Supervision
// ============================================================================

mod supervision_tests {
    use super::*;

    fn survey_reasoner() -> ScriptedReasoner {
        ScriptedReasoner::new().script(
            "survey",
            vec![Decision::Call(ToolCall::with_id("c1", "survey", json!({})))],
        )
    }

    #[tokio::test]
    async fn test_panicking_agent_is_restarted_from_checkpoint() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Fragile::new(1));
        let (driver, _env, store) = driver(&config(), registry, survey_reasoner());

        let result = driver
            .run(vec![AgentSpec::new("scout", "s1", "survey")], &HashSet::new())
            .await;

        let report = result.report("scout", "s1").unwrap();
        assert_eq!(report.restarts, 1);
        assert!(report.is_done());
        assert_eq!(report.final_answer.as_deref(), Some("north patch is ripe"));

        let cp = store.load("scout", "s1").await.unwrap().unwrap();
        let calls = cp
            .conversation_context
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("c1"))
            .count();
        // One assistant call message and one observation
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_restarts() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Fragile::new(u32::MAX));
        let mut config = config();
        config.swarm.max_restarts = 1;
        let (driver, _env, _store) = driver(&config, registry, survey_reasoner());

        let result = driver
            .run(vec![AgentSpec::new("scout", "s1", "survey")], &HashSet::new())
            .await;

        let report = result.report("scout", "s1").unwrap();
        assert_eq!(report.restarts, 1);
        assert!(report.checkpoint.is_none());
        assert!(report.error.as_deref().unwrap().contains("survey drone lost"));
        assert!(!result.all_done());
        assert_eq!(result.failed().len(), 1);
    }

    #[tokio::test]
    async fn test_one_agent_with_two_sessions_keeps_both_reports() {
        let reasoner = ScriptedReasoner::new()
            .script("report apples", add_fact_call("c1", "apples"))
            .script("report pears", add_fact_call("c2", "pears"));
        let (driver, env, _store) = driver(&config(), CapabilityRegistry::new(), reasoner);

        let result = driver
            .run(
                vec![
                    AgentSpec::new("a1", "s1", "report apples"),
                    AgentSpec::new("a1", "s2", "report pears"),
                ],
                &HashSet::new(),
            )
            .await;

        assert_eq!(result.reports.len(), 2);
        assert!(result.all_done());
        let sessions: Vec<&str> = result.reports.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["s1", "s2"]);
        assert_eq!(result.reports_for("a1").count(), 2);
        assert!(result.report("a1", "s1").unwrap().is_done());
        assert!(result.report("a1", "s2").unwrap().is_done());
        assert_eq!(result.answers().len(), 2);

        let facts = env.get_facts(&swarm(), "fruit", 10).await.unwrap();
        assert_eq!(facts.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_session_is_rejected_without_running() {
        let reasoner = ScriptedReasoner::new().script("report apples", add_fact_call("c1", "apples"));
        let (driver, env, _store) = driver(&config(), CapabilityRegistry::new(), reasoner);

        let result = driver
            .run(
                vec![
                    AgentSpec::new("a1", "s1", "report apples"),
                    AgentSpec::new("a1", "s1", "report apples"),
                ],
                &HashSet::new(),
            )
            .await;

        assert_eq!(result.reports.len(), 2);
        assert!(result.reports[0].is_done());
        let duplicate = &result.reports[1];
        assert!(duplicate.checkpoint.is_none());
        assert!(duplicate.error.as_deref().unwrap().contains("duplicate"));
        assert_eq!(result.failed().len(), 1);

        // Only the first spec ran
        let facts = env.get_facts(&swarm(), "fruit", 10).await.unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_swarm_finishes_every_agent() {
        let (driver, _env, _store) =
            driver(&config(), CapabilityRegistry::new(), ScriptedReasoner::new());
        driver.cancel_handle().cancel();

        let result = driver
            .run(
                vec![AgentSpec::new("a1", "s1", "g"), AgentSpec::new("a2", "s2", "g")],
                &HashSet::new(),
            )
            .await;

        assert!(result.all_done());
        for report in &result.reports {
            let cp = report.checkpoint.as_ref().unwrap();
            assert_eq!(cp.termination, Some(Termination::Cancelled));
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_persists_environment_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.persistence.checkpoint_dir = Some(dir.path().join("checkpoints"));
        config.persistence.environment_path = Some(dir.path().join("env.json"));

        let reasoner = ScriptedReasoner::new().script("publish", add_fact_call("c1", "apples"));
        let driver =
            SwarmDriver::from_config(&config, Arc::new(reasoner), CapabilityRegistry::new())
                .unwrap();
        let result = driver
            .run(vec![AgentSpec::new("writer", "s1", "publish")], &HashSet::new())
            .await;
        assert!(result.all_done());
        assert!(dir.path().join("env.json").exists());
        assert!(dir.path().join("checkpoints").join("writer").join("s1.json").exists());

        let reopened =
            SwarmDriver::from_config(&config, Arc::new(ScriptedReasoner::new()), CapabilityRegistry::new())
                .unwrap();
        let facts = reopened
            .environment()
            .get_facts(&swarm(), "fruit", 10)
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "apples");

        let cp = reopened
            .checkpoints()
            .load("writer", "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.phase, Phase::Done);
    }
}
