//! Unit tests for the shared environment
//!
//! Tests cover:
//! - Fact publication visible across agents (scenario A)
//! - Lazy exponential decay (scenario B)
//! - Concept ranking and task board through the public API
//! - Concurrent writers on a multi-threaded runtime
//! - Snapshot persistence

use std::sync::Arc;

use stigmer::clock::ManualClock;
use stigmer::config::EnvironmentConfig;
use stigmer::environment::{Environment, InMemoryEnvironment, SwarmId, TaskId};

fn env_with(rate: f64, unit_ms: u64) -> (Arc<InMemoryEnvironment>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let config = EnvironmentConfig {
        decay_rate: rate,
        decay_unit_ms: unit_ms,
        min_strength: 0.0,
    };
    let env = Arc::new(InMemoryEnvironment::new(&config, clock.clone()));
    (env, clock)
}

fn swarm() -> SwarmId {
    SwarmId::new("orchard")
}

// ============================================================================
// Facts
// ============================================================================

mod fact_tests {
    use super::*;

    #[tokio::test]
    async fn test_three_publishers_one_reader() {
        let (env, clock) = env_with(0.9, 1_000);
        for (agent, text) in [("a1", "apples"), ("a2", "pears"), ("a3", "plums")] {
            env.add_fact(&swarm(), "fruit", text, agent).await.unwrap();
            clock.advance_millis(10);
        }

        let facts = env.get_facts(&swarm(), "fruit", 10).await.unwrap();
        let seen: Vec<(&str, &str)> = facts
            .iter()
            .map(|f| (f.source_agent_id.as_str(), f.content.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![("a3", "plums"), ("a2", "pears"), ("a1", "apples")]
        );
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let (env, _clock) = env_with(0.9, 1_000);
        env.add_fact(&swarm(), "fruit", "first", "a1").await.unwrap();
        env.add_fact(&swarm(), "fruit", "second", "a2").await.unwrap();

        let facts = env.get_facts(&swarm(), "fruit", 10).await.unwrap();
        assert_eq!(facts[0].content, "second");
        assert_eq!(facts[1].content, "first");
    }

    #[tokio::test]
    async fn test_unknown_topic_and_zero_limit_are_empty() {
        let (env, _clock) = env_with(0.9, 1_000);
        env.add_fact(&swarm(), "fruit", "apples", "a1").await.unwrap();

        assert!(env.get_facts(&swarm(), "veg", 10).await.unwrap().is_empty());
        assert!(env.get_facts(&swarm(), "fruit", 0).await.unwrap().is_empty());
        // Topic match is exact
        assert!(env.get_facts(&swarm(), "Fruit", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_do_not_change_facts() {
        let (env, _clock) = env_with(0.9, 1_000);
        env.add_fact(&swarm(), "fruit", "apples", "a1").await.unwrap();
        let first = env.get_facts(&swarm(), "fruit", 10).await.unwrap();
        let second = env.get_facts(&swarm(), "fruit", 10).await.unwrap();
        assert_eq!(first, second);
    }
}

// ============================================================================
// Concepts
// ============================================================================

mod concept_tests {
    use super::*;

    #[tokio::test]
    async fn test_half_life_decay() {
        let (env, clock) = env_with(0.5, 1_000);
        env.reinforce(&swarm(), "x", 5.0).await.unwrap();

        clock.advance_millis(1_000);
        let at_one = env.strength_of(&swarm(), "x").await.unwrap();
        assert!((at_one - 2.5).abs() < 1e-9, "got {}", at_one);

        clock.advance_millis(1_000);
        let at_two = env.strength_of(&swarm(), "x").await.unwrap();
        assert!((at_two - 1.25).abs() < 1e-9, "got {}", at_two);
    }

    #[tokio::test]
    async fn test_fractional_units_decay_continuously() {
        let (env, clock) = env_with(0.25, 1_000);
        env.reinforce(&swarm(), "x", 4.0).await.unwrap();
        clock.advance_millis(500);
        let s = env.strength_of(&swarm(), "x").await.unwrap();
        assert!((s - 2.0).abs() < 1e-9, "got {}", s);
    }

    #[tokio::test]
    async fn test_unknown_concept_reads_zero_without_creating_it() {
        let (env, _clock) = env_with(0.5, 1_000);
        assert_eq!(env.strength_of(&swarm(), "ghost").await.unwrap(), 0.0);
        assert!(env.stored_concept(&swarm(), "ghost").is_none());
        assert!(env.top_concepts(&swarm(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_concepts_prefers_recent_and_fresh() {
        let (env, clock) = env_with(0.5, 1_000);
        env.reinforce(&swarm(), "old", 4.0).await.unwrap();
        clock.advance_millis(2_000);
        env.reinforce(&swarm(), "new", 2.0).await.unwrap();

        // old has decayed to 1.0, new is 2.0
        let top = env.top_concepts(&swarm(), 5).await.unwrap();
        let names: Vec<&str> = top.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["new", "old"]);

        let only = env.top_concepts(&swarm(), 1).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "new");
    }

    #[tokio::test]
    async fn test_invalid_deltas_are_rejected() {
        let (env, _clock) = env_with(0.5, 1_000);
        for delta in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(env.reinforce(&swarm(), "x", delta).await.is_err());
        }
        assert!(env.stored_concept(&swarm(), "x").is_none());
    }
}

// ============================================================================
// Tasks
// ============================================================================

mod task_tests {
    use super::*;

    #[tokio::test]
    async fn test_task_lifecycle() {
        let (env, clock) = env_with(0.9, 1_000);
        let first = env.post_task(&swarm(), "survey north", "a1").await.unwrap();
        clock.advance_millis(5);
        let second = env.post_task(&swarm(), "survey south", "a1").await.unwrap();

        let open = env.open_tasks(&swarm(), 10).await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, first);

        assert!(env.complete_task(&swarm(), &first, "a2").await.unwrap());
        assert!(!env.complete_task(&swarm(), &first, "a3").await.unwrap());

        let open = env.open_tasks(&swarm(), 10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second);
    }

    #[tokio::test]
    async fn test_completing_unknown_task_fails() {
        let (env, _clock) = env_with(0.9, 1_000);
        let missing = TaskId::from("nope");
        assert!(env.complete_task(&swarm(), &missing, "a1").await.is_err());
    }
}

// ============================================================================
// Concurrency and persistence
// ============================================================================

mod shared_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_writers_lose_nothing() {
        let (env, _clock) = env_with(0.9, 1_000);
        let mut handles = Vec::new();
        for agent in 0..6 {
            let env = env.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("agent_{}", agent);
                for i in 0..50 {
                    env.reinforce(&swarm(), "trail", 1.0).await.unwrap();
                    env.add_fact(&swarm(), "log", &format!("{} #{}", id, i), &id)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Clock never moved, so no decay
        let strength = env.strength_of(&swarm(), "trail").await.unwrap();
        assert!((strength - 300.0).abs() < 1e-9, "got {}", strength);
        assert_eq!(env.get_facts(&swarm(), "log", 1_000).await.unwrap().len(), 300);
    }

    #[tokio::test]
    async fn test_snapshot_file_roundtrip_keeps_traces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("env.json");
        let (env, clock) = env_with(0.5, 1_000);
        env.reinforce(&swarm(), "x", 8.0).await.unwrap();
        env.add_fact(&swarm(), "fruit", "apples", "a1").await.unwrap();
        env.save_snapshot(&path).unwrap();

        let config = EnvironmentConfig {
            decay_rate: 0.5,
            decay_unit_ms: 1_000,
            min_strength: 0.0,
        };
        let restored = InMemoryEnvironment::load_snapshot(&path, &config, clock.clone()).unwrap();
        clock.advance_millis(1_000);
        let s = restored.strength_of(&swarm(), "x").await.unwrap();
        assert!((s - 4.0).abs() < 1e-9, "got {}", s);
        assert_eq!(
            restored.get_facts(&swarm(), "fruit", 10).await.unwrap()[0].content,
            "apples"
        );
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let env = InMemoryEnvironment::load_snapshot(
            &dir.path().join("absent.json"),
            &EnvironmentConfig::default(),
            clock,
        )
        .unwrap();
        assert!(env.dump().swarms.is_empty());
    }
}
