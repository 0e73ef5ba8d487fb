use std::time::Duration;

use crate::domain::models::{OperatingMode, Priority, QualityTier, StaggerPattern, StrategyConfig};

/// Strike parameters resolved for one operating mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub mode: OperatingMode,
    pub max_parallel_agents: usize,
    pub min_quality_tier: QualityTier,
    pub strike_timeout: Duration,
    pub stagger: StaggerPattern,
    pub early_termination_on_success: bool,
    pub success_cooldown: Duration,
    pub failure_cooldown: Duration,
}

impl Strategy {
    pub fn from_config(mode: OperatingMode, config: &StrategyConfig) -> Self {
        Self {
            mode,
            max_parallel_agents: config.max_parallel_agents.max(1),
            min_quality_tier: QualityTier::new(config.min_quality_tier),
            strike_timeout: Duration::from_secs(config.strike_timeout_secs),
            stagger: config.stagger,
            early_termination_on_success: config.early_termination_on_success,
            success_cooldown: Duration::from_secs(config.success_cooldown_secs),
            failure_cooldown: Duration::from_secs(config.failure_cooldown_secs),
        }
    }

    /// Stagger delay of agent `index` out of `count`.
    ///
    /// Divided by the priority speed multiplier; `timing_scale` stretches the
    /// adaptive mode's delays with the feedback loop and is ignored elsewhere.
    pub fn delay(&self, index: usize, count: usize, priority: Priority, timing_scale: f64) -> Duration {
        let raw_ms = match self.stagger {
            StaggerPattern::Linear { step_ms } => index as f64 * step_ms as f64,
            StaggerPattern::Spread { window_ms } => {
                if count == 0 {
                    0.0
                } else {
                    window_ms as f64 * index as f64 / count as f64
                }
            }
        };

        let scale = if self.mode == OperatingMode::Adaptive {
            timing_scale.max(0.0)
        } else {
            1.0
        };

        Duration::from_secs_f64(raw_ms * scale / priority.speed_multiplier() / 1000.0)
    }

    /// Post-attempt cooldown for an agent.
    pub const fn cooldown(&self, success: bool) -> Duration {
        if success {
            self.success_cooldown
        } else {
            self.failure_cooldown
        }
    }
}
