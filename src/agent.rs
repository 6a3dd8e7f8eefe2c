//! Agent capability contract.
//!
//! An agent is anything that exposes named capabilities: a camera that can
//! `capture`, a planner that can `act_and_parse`, an arm that can `do`. The
//! scheduler never looks inside; it hands the agent to the callable bound to
//! a task, and the callable decides which capability to invoke.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Value;
use crate::error::{Error, Result};

/// A capability provider.
///
/// Any I/O (network, audio, hardware) is the agent's own concern. From the
/// scheduler's point of view `invoke` either yields a value or an error.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Capabilities this agent answers to. Used for diagnostics only.
    fn capabilities(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Run a capability with ordered arguments.
    async fn invoke(&self, capability: &str, args: Vec<Value>) -> Result<Value>;
}

/// Shared handle to an agent, resolved once when the orchestration is built.
pub type AgentRef = Arc<dyn Agent>;

/// Agents available to an orchestration, keyed by the name tasks refer to.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentRef>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under `key`. A later registration under the same key
    /// replaces the earlier one.
    pub fn insert(&mut self, key: &str, agent: AgentRef) {
        self.agents.insert(key.to_string(), agent);
    }

    pub fn get(&self, key: &str) -> Option<AgentRef> {
        self.agents.get(key).cloned()
    }

    /// Look up an agent on behalf of `task`, failing with a configuration error.
    pub fn resolve(&self, task: &str, key: &str) -> Result<AgentRef> {
        self.get(key).ok_or_else(|| {
            Error::config(task, None, format!("agent '{}' is not registered", key))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.agents.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Error for a capability an agent does not provide.
pub fn unknown_capability(agent: &dyn Agent, capability: &str) -> Error {
    Error::UnknownCapability {
        agent: agent.name().to_string(),
        capability: capability.to_string(),
    }
}
