use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, Platform, QualityTier};

/// Port for the agent registry / profile provider
///
/// Implementations must never return an agent whose `cooldown_until` lies
/// in the future, nor one leased to a running strike.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Agents at or above `min_tier` that are neither cooling down nor leased.
    async fn healthy_agents(&self, source: Platform, min_tier: QualityTier)
        -> DomainResult<Vec<Agent>>;

    /// Record the outcome of one attempt for an agent on a platform.
    async fn record_feedback(&self, agent_id: &str, source: Platform, success: bool)
        -> DomainResult<()>;

    /// Keep the agent out of selection until `until`.
    async fn apply_cooldown(&self, agent_id: &str, until: DateTime<Utc>) -> DomainResult<()>;

    /// Lease up to `limit` of `agent_ids`, taken in order, for one strike.
    ///
    /// Agents already leased, cooling down or unknown are skipped. Returns the
    /// granted ids; they stay out of `healthy_agents` until released.
    async fn reserve(&self, agent_ids: &[String], limit: usize) -> DomainResult<Vec<String>>;

    /// Return leased agents to the pool.
    async fn release(&self, agent_ids: &[String]) -> DomainResult<()>;
}
