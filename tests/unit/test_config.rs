//! Unit tests for the config module
//!
//! Tests cover:
//! - Loading a full TOML file from disk
//! - Backoff strategy encoding
//! - Validation failures surfacing through the error type

use std::io::Write;
use std::time::Duration;

use stigmer::config::Config;
use stigmer::errors::ConfigError;
use stigmer::supervision::BackoffStrategy;

const FULL: &str = r#"
[swarm]
swarm_id = "orchard"
max_restarts = 5
restart_backoff = { exponential = { base_ms = 50, max_ms = 400 } }

[environment]
decay_rate = 0.5
decay_unit_ms = 1000
min_strength = 0.01

[agent]
max_steps = 8
reasoning_retries = 1
store_retry_budget = 2
store_backoff = { fixed = { ms = 0 } }
snapshot_concepts = 3
snapshot_facts = 4
reflection_weight = 2.0
capability_timeout_ms = 1500

[persistence]
checkpoint_dir = "/var/lib/stigmer/checkpoints"
environment_path = "/var/lib/stigmer/env.json"

[telemetry]
filter = "stigmer=debug"
json = true
"#;

// ============================================================================
// Loading
// ============================================================================

mod loading_tests {
    use super::*;

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.swarm.max_restarts, 5);
        assert_eq!(
            config.swarm.restart_backoff,
            BackoffStrategy::Exponential {
                base_ms: 50,
                max_ms: 400
            }
        );
        assert_eq!(config.environment.decay_unit(), Duration::from_secs(1));
        assert!((config.environment.min_strength - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.agent.max_steps, 8);
        assert_eq!(config.agent.snapshot_facts, 4);
        assert_eq!(
            config.agent.capability_timeout(),
            Some(Duration::from_millis(1500))
        );
        assert!(config.persistence.checkpoint_dir.is_some());
        assert!(config.telemetry.json);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.swarm.swarm_id, "default");
        assert_eq!(config.agent.max_steps, 16);
        assert!(config.persistence.environment_path.is_none());
        assert!(!config.telemetry.json);
    }
}

// ============================================================================
// Validation
// ============================================================================

mod validation_tests {
    use super::*;

    #[test]
    fn test_invalid_values_are_rejected_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[environment]\ndecay_rate = 1.0\n").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        match err {
            ConfigError::Invalid { field, .. } => assert_eq!(field, "environment.decay_rate"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reflection_weight_and_swarm_id_checks() {
        let mut config = Config::default();
        config.agent.reflection_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swarm.swarm_id = "   ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.environment.min_strength = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_error_messages_name_the_field() {
        let mut config = Config::default();
        config.agent.max_steps = 0;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("agent.max_steps"), "message was {}", message);
    }
}
