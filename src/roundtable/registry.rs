//! Run-scoped agent registry.
//!
//! An [`AgentRegistry`] is an in-memory map from agent id to [`Agent`],
//! preserving registration order. One registry instance is created per
//! conversation run and passed to the workflow explicitly; nothing in this
//! crate holds a process-wide registry, so two runs can never evict each
//! other's registrations.

use crate::agent::Agent;
use crate::conversation::AgentProfile;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A registry shared between the caller and one workflow run.
pub type SharedAgentRegistry = Arc<RwLock<AgentRegistry>>;

/// In-memory mapping from agent id to agent configuration, scoped to the
/// lifetime of one conversation run.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
    /// Agent ids in registration order; determines roster order for prompts
    /// and for deterministic fallback selection.
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh registry for sharing with a workflow run.
    pub fn shared() -> SharedAgentRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Store an agent, overwriting any prior registration under the same id.
    /// Re-registering keeps the agent's original position in the order.
    pub fn register(&mut self, agent: Agent) {
        if !self.agents.contains_key(&agent.id) {
            self.order.push(agent.id.clone());
        }
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Remove and return the agent registered under `id`.
    pub fn unregister(&mut self, id: &str) -> Option<Agent> {
        self.order.retain(|aid| aid != id);
        self.agents.remove(id)
    }

    /// Look up an agent by id.
    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// All registered agents, in registration order.
    pub fn agents(&self) -> Vec<&Agent> {
        self.order.iter().filter_map(|id| self.agents.get(id)).collect()
    }

    /// Read-only roster projection used for prompt building.
    pub fn profiles(&self) -> Vec<AgentProfile> {
        self.agents()
            .into_iter()
            .map(|a| AgentProfile {
                id: a.id.clone(),
                name: a.name.clone(),
                characteristics: a.characteristics.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
