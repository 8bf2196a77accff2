//! Telemetry
//!
//! Structured logging for swarm runs:
//! - Subscriber setup (compact or JSON) driven by [`TelemetryConfig`]
//! - Per-step spans carrying agent, session, phase and step
//! - Capability call timing
//! - Log sanitisation and secret redaction for tool-provided text

use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::checkpoint::AgentCheckpoint;
use crate::config::TelemetryConfig;

/// Escape control characters so tool-provided text cannot forge log lines.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)(sk-|key-|token-)[A-Za-z0-9_\-]{8,}").expect("invalid secret regex"),
            Regex::new(r"(?i)Bearer\s+[A-Za-z0-9_\-\.]{8,}").expect("invalid bearer regex"),
            Regex::new(r"(?i)(password|passwd|pwd)\s*=\s*\S+").expect("invalid password regex"),
        ]
    })
}

/// Replace API keys, bearer tokens and inline passwords with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    let mut result = input.to_string();
    for pattern in secret_patterns() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }
    result
}

/// Sanitised and redacted form of untrusted text, ready for a log field.
pub fn loggable(input: &str) -> String {
    redact_secrets(&sanitize_for_log(input))
}

/// Install the global subscriber. Later calls are no-ops; `RUST_LOG` takes
/// precedence over `config.filter`.
pub fn init_tracing(config: &TelemetryConfig) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.filter.clone());
        let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = tracing_subscriber::registry().with(filter_layer);
        let _ = if config.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(std::io::stderr),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .try_init()
        };
    });
}

/// Span wrapping one control-loop step.
pub fn step_span(checkpoint: &AgentCheckpoint) -> Span {
    info_span!(
        "agent.step",
        agent_id = %checkpoint.agent_id,
        session_id = %checkpoint.session_id,
        phase = %checkpoint.phase,
        step = checkpoint.step,
    )
}

/// Run a capability call inside a timed span, logging the outcome.
pub async fn track_capability<F, Fut, T, E>(tool: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let span = info_span!(
        "capability.invoke",
        tool = %loggable(tool),
        duration_ms = tracing::field::Empty,
        success = tracing::field::Empty,
    );

    let result = f().instrument(span.clone()).await;
    let duration = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration);
    span.record("success", result.is_ok());

    span.in_scope(|| match &result {
        Ok(_) => debug!(duration_ms = duration, "Capability call completed"),
        Err(e) => warn!(
            duration_ms = duration,
            error = %loggable(&e.to_string()),
            "Capability call failed"
        ),
    });
    result
}

#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
