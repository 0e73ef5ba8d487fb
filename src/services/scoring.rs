use crate::domain::models::{OperatingMode, Opportunity, Priority};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Service for calculating dynamic opportunity scores
///
/// Score formula:
/// `100 + (5 - rank) * 20 - min(age / 60, 50) + (confidence - 0.5) * 60
///  - attempts * 5 ± mode_adjustment`, floored at 0.
///
/// Scores are recomputed every time they are read so aging is always
/// reflected; nothing here is cached on the opportunity.
#[derive(Debug, Clone)]
pub struct OpportunityScorer {
    freshness_window: Duration,
}

impl Default for OpportunityScorer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl OpportunityScorer {
    const BASE: f64 = 100.0;
    const PRIORITY_STEP: f64 = 20.0;
    const MAX_FRESHNESS_PENALTY: f64 = 50.0;
    const CONFIDENCE_WEIGHT: f64 = 60.0;
    const ATTEMPT_PENALTY: f64 = 5.0;

    /// Create a scorer with the configured freshness window
    pub const fn new(freshness_window: Duration) -> Self {
        Self { freshness_window }
    }

    pub const fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Full score under `mode`, floored at 0
    pub fn score(&self, opportunity: &Opportunity, mode: OperatingMode, now: DateTime<Utc>) -> f64 {
        let raw = self.raw_base_score(opportunity, now) + self.mode_adjustment(opportunity, mode, now);
        raw.max(0.0)
    }

    /// Score before any mode adjustment, floored at 0
    pub fn base_score(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> f64 {
        self.raw_base_score(opportunity, now).max(0.0)
    }

    fn raw_base_score(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> f64 {
        let priority_weight = f64::from(5 - opportunity.priority.rank()) * Self::PRIORITY_STEP;
        let freshness_penalty =
            (opportunity.age_seconds(now) / 60.0).min(Self::MAX_FRESHNESS_PENALTY);
        let confidence_term = (opportunity.confidence_score - 0.5) * Self::CONFIDENCE_WEIGHT;
        let attempt_penalty = f64::from(opportunity.attempt_count) * Self::ATTEMPT_PENALTY;

        Self::BASE + priority_weight - freshness_penalty + confidence_term - attempt_penalty
    }

    /// Strategy-specific bonus or penalty
    ///
    /// Aggressive modes favor critical and fresh listings; cautious modes
    /// favor verified older listings and distrust very fresh ones as
    /// possible decoys.
    pub fn mode_adjustment(
        &self,
        opportunity: &Opportunity,
        mode: OperatingMode,
        now: DateTime<Utc>,
    ) -> f64 {
        let age = opportunity.age_seconds(now);
        let fresh = opportunity.is_fresh(self.freshness_window, now);
        let confidence = opportunity.confidence_score;

        match mode {
            OperatingMode::Beast => {
                let mut bonus = 0.0;
                if opportunity.priority == Priority::Critical {
                    bonus += 15.0;
                }
                if fresh {
                    bonus += 10.0;
                }
                bonus
            }
            OperatingMode::Stealth => {
                let mut adjustment = 0.0;
                if confidence >= 0.8 && age >= 60.0 {
                    adjustment += 10.0;
                }
                if age < 5.0 {
                    adjustment -= 15.0;
                }
                adjustment
            }
            OperatingMode::UltraStealth => {
                let mut adjustment = 0.0;
                if confidence >= 0.9 && age >= 120.0 {
                    adjustment += 15.0;
                }
                if age < 10.0 {
                    adjustment -= 25.0;
                }
                adjustment
            }
            OperatingMode::Adaptive => {
                if fresh && confidence >= 0.7 {
                    8.0
                } else {
                    0.0
                }
            }
            OperatingMode::Hybrid => {
                let urgent = matches!(opportunity.priority, Priority::Critical | Priority::High);
                if fresh && urgent {
                    5.0
                } else {
                    0.0
                }
            }
        }
    }
}
