//! Onboarded agent tracking

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use xapp_arbiter_common::{Agent, AgentId};

/// Registry of onboarded agents, kept in onboarding order.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
    index: HashMap<AgentId, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `agent_id`. Returns false if it was already onboarded.
    pub fn onboard(&mut self, agent_id: &AgentId, now: DateTime<Utc>) -> bool {
        if self.index.contains_key(agent_id) {
            return false;
        }
        self.index.insert(agent_id.clone(), self.agents.len());
        self.agents.push(Agent {
            id: agent_id.clone(),
            onboarded_at: now,
        });
        true
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.index.contains_key(agent_id)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&Agent> {
        self.index.get(agent_id).map(|&i| &self.agents[i])
    }

    /// Agents in onboarding order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onboard_is_idempotent() {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        let a1 = AgentId::from("xApp1");

        assert!(registry.onboard(&a1, now));
        assert!(!registry.onboard(&a1, now + chrono::Duration::seconds(3)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&a1).map(|a| a.onboarded_at), Some(now));
    }

    #[test]
    fn test_agents_keep_onboarding_order() {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        for id in ["xApp2", "xApp1", "xApp3"] {
            registry.onboard(&AgentId::from(id), now);
        }

        let order: Vec<&str> = registry.agents().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(order, vec!["xApp2", "xApp1", "xApp3"]);
    }
}
