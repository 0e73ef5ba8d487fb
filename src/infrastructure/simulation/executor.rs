use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

use crate::domain::errors::StrikeError;
use crate::domain::models::{Agent, Opportunity};
use crate::domain::ports::{AttemptContext, ClaimExecutor};

/// Odds and latency of a simulated claim attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationProfile {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Chance an attempt secures the listing
    pub win_probability: f64,
    /// Chance the source blocks the agent instead
    pub block_probability: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            min_latency_ms: 150,
            max_latency_ms: 1_500,
            win_probability: 0.25,
            block_probability: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Roll {
    Win,
    Blocked,
    Lost,
}

/// Claim executor that rolls dice instead of driving a browser.
///
/// Higher-tier agents get a modest edge on the win roll. Waits out the
/// attempt's action delay before its simulated latency and honours the
/// cancellation token throughout.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    profile: SimulationProfile,
    attempts: AtomicU64,
    wins: AtomicU64,
}

impl SimulatedExecutor {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            attempts: AtomicU64::new(0),
            wins: AtomicU64::new(0),
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn wins(&self) -> u64 {
        self.wins.load(Ordering::Relaxed)
    }

    fn roll(&self, agent: &Agent) -> (Duration, Roll) {
        let mut rng = rand::thread_rng();
        let low = self.profile.min_latency_ms.min(self.profile.max_latency_ms);
        let high = self.profile.max_latency_ms.max(low);
        let latency = Duration::from_millis(rng.gen_range(low..=high));

        let edge = 0.8 + 0.4 * agent.quality_tier.normalized();
        let win = (self.profile.win_probability * edge).clamp(0.0, 1.0);
        let block = self.profile.block_probability.clamp(0.0, 1.0 - win);

        let draw: f64 = rng.gen();
        let roll = if draw < block {
            Roll::Blocked
        } else if draw < block + win {
            Roll::Win
        } else {
            Roll::Lost
        };
        (latency, roll)
    }
}

#[async_trait]
impl ClaimExecutor for SimulatedExecutor {
    async fn attempt(
        &self,
        ctx: AttemptContext,
        opportunity: &Opportunity,
        agent: &Agent,
    ) -> Result<bool, StrikeError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let (latency, roll) = self.roll(agent);
        let busy = ctx.action_delay + latency;

        tokio::select! {
            () = ctx.cancel.cancelled() => {
                trace!(agent_id = %agent.agent_id, index = ctx.index, "Simulated attempt cancelled");
                Ok(false)
            }
            () = tokio::time::sleep(busy) => match roll {
                Roll::Win => {
                    self.wins.fetch_add(1, Ordering::Relaxed);
                    Ok(true)
                }
                Roll::Blocked => Err(StrikeError::blocked(format!(
                    "{} challenge page",
                    opportunity.source
                ))),
                Roll::Lost => Err(StrikeError::Rejected("listing sold to another buyer".to_string())),
            },
        }
    }
}
