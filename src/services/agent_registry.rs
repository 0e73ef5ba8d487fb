use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, Platform, QualityTier};
use crate::domain::ports::AgentProvider;

/// In-memory agent registry.
///
/// Holds the execution agents, their per-platform history and cooldowns.
/// Mutations are scoped to one agent entry under a short write lock.
/// Agents leased to a running strike are tracked beside the entries and
/// hidden from `healthy_agents` until released.
#[derive(Clone, Default)]
pub struct InMemoryAgentRegistry {
    agents: Arc<RwLock<HashMap<String, Agent>>>,
    leased: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `agents`.
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let map = agents
            .into_iter()
            .map(|agent| (agent.agent_id.clone(), agent))
            .collect();
        Self {
            agents: Arc::new(RwLock::new(map)),
            leased: Arc::default(),
        }
    }

    /// Add or replace an agent.
    pub async fn register(&self, agent: Agent) {
        let mut agents = self.agents.write().await;
        debug!(agent_id = %agent.agent_id, tier = %agent.quality_tier, "Registering agent");
        agents.insert(agent.agent_id.clone(), agent);
    }

    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// All agents sorted by id, cooling down or not.
    pub async fn snapshot(&self) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut all: Vec<Agent> = agents.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Agents whose cooldown has not yet expired at `now`.
    pub async fn cooling_down(&self, now: DateTime<Utc>) -> Vec<String> {
        let agents = self.agents.read().await;
        let mut ids: Vec<String> = agents
            .values()
            .filter(|agent| agent.is_cooling_down(now))
            .map(|agent| agent.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Agents currently leased to a strike, sorted.
    pub async fn leased(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.leased.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl AgentProvider for InMemoryAgentRegistry {
    async fn healthy_agents(
        &self,
        source: Platform,
        min_tier: QualityTier,
    ) -> DomainResult<Vec<Agent>> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        let leased = self.leased.read().await;
        let healthy: Vec<Agent> = agents
            .values()
            .filter(|agent| agent.quality_tier >= min_tier)
            .filter(|agent| !agent.is_cooling_down(now))
            .filter(|agent| !leased.contains(&agent.agent_id))
            .cloned()
            .collect();

        debug!(
            source = %source,
            min_tier = %min_tier,
            healthy = healthy.len(),
            total = agents.len(),
            "Healthy agents resolved"
        );
        Ok(healthy)
    }

    #[instrument(skip(self), err)]
    async fn record_feedback(
        &self,
        agent_id: &str,
        source: Platform,
        success: bool,
    ) -> DomainResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;
        agent.record_attempt(source, success, Utc::now());
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn apply_cooldown(&self, agent_id: &str, until: DateTime<Utc>) -> DomainResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;

        // Never shorten an existing, longer cooldown
        agent.cooldown_until = Some(agent.cooldown_until.map_or(until, |current| current.max(until)));
        Ok(())
    }

    async fn reserve(&self, agent_ids: &[String], limit: usize) -> DomainResult<Vec<String>> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        let mut leased = self.leased.write().await;

        let mut granted = Vec::with_capacity(limit.min(agent_ids.len()));
        for id in agent_ids {
            if granted.len() >= limit {
                break;
            }
            let available = agents
                .get(id)
                .is_some_and(|agent| !agent.is_cooling_down(now));
            if available && leased.insert(id.clone()) {
                granted.push(id.clone());
            }
        }

        debug!(requested = agent_ids.len(), granted = granted.len(), "Agents leased");
        Ok(granted)
    }

    async fn release(&self, agent_ids: &[String]) -> DomainResult<()> {
        let mut leased = self.leased.write().await;
        for id in agent_ids {
            leased.remove(id);
        }
        Ok(())
    }
}
