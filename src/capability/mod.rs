//! Capability Layer
//!
//! Tools the control loop can invoke. The loop only sees the
//! [`CapabilityLayer`] shape (`invoke(tool, args) -> result | error`);
//! concrete tools live behind the [`Capability`] trait and are collected in a
//! name-keyed [`CapabilityRegistry`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::environment::SwarmId;
use crate::errors::CapabilityError;
use crate::telemetry::{loggable, track_capability};

pub mod builtin;

/// Who is calling; lets environment-backed tools attribute their writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub agent_id: String,
    pub swarm_id: SwarmId,
}

impl CallContext {
    pub fn new(agent_id: impl Into<String>, swarm_id: SwarmId) -> Self {
        Self {
            agent_id: agent_id.into(),
            swarm_id,
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn execute(&self, ctx: &CallContext, args: Value) -> Result<Value>;
}

/// What the control loop calls during `Acting`.
#[async_trait]
pub trait CapabilityLayer: Send + Sync {
    async fn invoke(
        &self,
        ctx: &CallContext,
        tool: &str,
        args: Value,
    ) -> std::result::Result<Value, CapabilityError>;
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    timeout: Option<Duration>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls running longer than `timeout` fail with [`CapabilityError::Timeout`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a capability, replacing any existing one with the same name.
    pub fn register<C: Capability + 'static>(&mut self, capability: C) {
        self.capabilities
            .insert(capability.name().to_string(), Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Capability> {
        self.capabilities.get(name).map(|c| c.as_ref())
    }

    /// Registered capability names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[async_trait]
impl CapabilityLayer for CapabilityRegistry {
    async fn invoke(
        &self,
        ctx: &CallContext,
        tool: &str,
        args: Value,
    ) -> std::result::Result<Value, CapabilityError> {
        let capability = self
            .capabilities
            .get(tool)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound {
                name: tool.to_string(),
            })?;

        debug!(agent_id = %ctx.agent_id, tool = %loggable(tool), "Invoking capability");
        let timeout = self.timeout;
        track_capability(tool, move || async move {
            let call = capability.execute(ctx, args);
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(CapabilityError::Timeout {
                            name: tool.to_string(),
                            millis: limit.as_millis() as u64,
                        })
                    }
                },
                None => call.await,
            };
            outcome.map_err(|e| CapabilityError::Execution {
                name: tool.to_string(),
                message: format!("{:#}", e),
            })
        })
        .await
    }
}

/// Capability layer of a disabled agent: every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCapabilities;

#[async_trait]
impl CapabilityLayer for DisabledCapabilities {
    async fn invoke(
        &self,
        ctx: &CallContext,
        _tool: &str,
        _args: Value,
    ) -> std::result::Result<Value, CapabilityError> {
        Err(CapabilityError::Disabled {
            agent_id: ctx.agent_id.clone(),
        })
    }
}
