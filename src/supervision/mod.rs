//! Retry and restart policies shared by the control loop and the swarm driver

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential { base_ms: u64, max_ms: u64 },
    Fixed { ms: u64 },
}

impl BackoffStrategy {
    pub fn duration(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(*max_ms))
            }
            Self::Fixed { ms } => Duration::from_millis(*ms),
        }
    }

    /// No waiting at all; handy for tests.
    pub fn none() -> Self {
        Self::Fixed { ms: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff: BackoffStrategy,
}

/// Why a supervised agent task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The session reached a terminal checkpoint.
    Normal,
    /// The loop returned an error.
    Error,
    /// The task panicked.
    Panicked,
}

/// Restart bookkeeping keyed by child id.
#[derive(Debug, Default)]
pub struct RestartTracker {
    policy: Option<RestartPolicy>,
    restarts: HashMap<String, u32>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy: Some(policy),
            restarts: HashMap::new(),
        }
    }

    pub fn restarts(&self, child_id: &str) -> u32 {
        self.restarts.get(child_id).copied().unwrap_or(0)
    }

    /// Record an abnormal exit. Returns the backoff to wait before restarting,
    /// or `None` once the child has used up its restarts.
    pub fn on_exit(&mut self, child_id: &str, reason: ExitReason) -> Option<Duration> {
        if reason == ExitReason::Normal {
            return None;
        }
        let policy = self.policy.as_ref()?;
        let count = self.restarts.entry(child_id.to_string()).or_insert(0);
        if *count >= policy.max_restarts {
            warn!(child_id = %child_id, restarts = *count, "Max restarts exceeded");
            return None;
        }
        let backoff = policy.backoff.duration(*count);
        *count += 1;
        debug!(child_id = %child_id, attempt = *count, backoff_ms = backoff.as_millis() as u64, "Scheduling restart");
        Some(backoff)
    }
}

/// Run `op` up to `retries + 1` times, sleeping per `backoff` between
/// attempts. `should_retry` decides whether a given error is worth another go.
pub async fn retry_with_backoff<F, Fut, T, E>(
    label: &str,
    retries: u32,
    backoff: &BackoffStrategy,
    should_retry: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries && should_retry(&e) => {
                let wait = backoff.duration(attempt);
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
