use rand::Rng;
use std::collections::HashMap;

use crate::domain::models::{Agent, Platform};

/// Quantum agent selection.
///
/// Each candidate scores a weighted blend of tier, platform success rate,
/// capped win history and identity uniqueness, plus small zero-mean noise.
/// The noise keeps the same proven agent from being picked every time.
#[derive(Debug, Clone)]
pub struct QuantumSelector {
    noise_amplitude: f64,
}

impl Default for QuantumSelector {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl QuantumSelector {
    const TIER_WEIGHT: f64 = 0.3;
    const SUCCESS_WEIGHT: f64 = 0.3;
    const HISTORY_WEIGHT: f64 = 0.2;
    const UNIQUENESS_WEIGHT: f64 = 0.2;
    const WIN_CAP: f64 = 100.0;

    pub fn new(noise_amplitude: f64) -> Self {
        Self {
            noise_amplitude: noise_amplitude.max(0.0),
        }
    }

    /// Deterministic part of the score for `agent` among `candidates`.
    pub fn base_score(&self, agent: &Agent, candidates: &[Agent], platform: Platform) -> f64 {
        let tier = agent.quality_tier.normalized();
        let success = agent.success_rate_on(platform);
        let history = f64::from(agent.total_wins).min(Self::WIN_CAP) / Self::WIN_CAP;
        let uniqueness = uniqueness(agent, candidates);

        Self::TIER_WEIGHT * tier
            + Self::SUCCESS_WEIGHT * success
            + Self::HISTORY_WEIGHT * history
            + Self::UNIQUENESS_WEIGHT * uniqueness
    }

    /// Score and sort candidates, best first.
    pub fn rank(&self, candidates: Vec<Agent>, platform: Platform) -> Vec<(Agent, f64)> {
        let mut rng = rand::thread_rng();
        let base: Vec<f64> = candidates
            .iter()
            .map(|agent| self.base_score(agent, &candidates, platform))
            .collect();

        let mut ranked: Vec<(Agent, f64)> = candidates
            .into_iter()
            .zip(base)
            .map(|(agent, score)| {
                let noise = if self.noise_amplitude > 0.0 {
                    rng.gen_range(-self.noise_amplitude..=self.noise_amplitude)
                } else {
                    0.0
                };
                (agent, score + noise)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Mean over identity attributes of `1 - share of candidates with the same value`.
fn uniqueness(agent: &Agent, candidates: &[Agent]) -> f64 {
    if candidates.len() <= 1 {
        return 1.0;
    }

    let attributes = agent.identity.attributes();
    let mut total = 0.0;
    for (slot, value) in attributes.iter().enumerate() {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for other in candidates {
            *counts.entry(other.identity.attributes()[slot]).or_insert(0) += 1;
        }
        let share = counts.get(value).copied().unwrap_or(0) as f64 / candidates.len() as f64;
        total += 1.0 - share;
    }
    total / attributes.len() as f64
}
