use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::opportunity::Platform;

/// Ordinal quality of an execution agent, 1 (lowest) through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityTier(u8);

impl QualityTier {
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(5);

    /// Clamp into the valid 1..=5 range.
    pub fn new(tier: u8) -> Self {
        Self(tier.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Tier scaled into (0, 1].
    pub fn normalized(&self) -> f64 {
        f64::from(self.0) / f64::from(Self::MAX.0)
    }
}

impl Default for QualityTier {
    fn default() -> Self {
        Self(3)
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Static identity attributes of an agent's browser profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub browser: String,
    pub os: String,
    pub locale: String,
    pub timezone: String,
    pub viewport: String,
}

impl AgentIdentity {
    /// Attribute values in a fixed order, for pool-wide comparisons.
    pub fn attributes(&self) -> [&str; 5] {
        [
            self.browser.as_str(),
            self.os.as_str(),
            self.locale.as_str(),
            self.timezone.as_str(),
            self.viewport.as_str(),
        ]
    }
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            browser: "chrome".to_string(),
            os: "windows".to_string(),
            locale: "it-IT".to_string(),
            timezone: "Europe/Rome".to_string(),
            viewport: "1920x1080".to_string(),
        }
    }
}

/// Historical performance of one agent on one platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub attempts: u32,
    pub successes: u32,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PlatformStats {
    /// Success rate, 0.5 when there is no history yet.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.5
        } else {
            f64::from(self.successes) / f64::from(self.attempts)
        }
    }

    pub fn record(&mut self, success: bool, at: DateTime<Utc>) {
        self.attempts += 1;
        if success {
            self.successes += 1;
            self.last_success_at = Some(at);
        }
    }
}

/// An execution identity (browser/session profile) able to attempt claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub quality_tier: QualityTier,
    pub identity: AgentIdentity,
    pub platform_stats: HashMap<Platform, PlatformStats>,
    /// Claims won across all platforms.
    pub total_wins: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, quality_tier: QualityTier) -> Self {
        Self {
            agent_id: agent_id.into(),
            quality_tier,
            identity: AgentIdentity::default(),
            platform_stats: HashMap::new(),
            total_wins: 0,
            cooldown_until: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: AgentIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    pub fn success_rate_on(&self, platform: Platform) -> f64 {
        self.platform_stats
            .get(&platform)
            .map_or(0.5, PlatformStats::success_rate)
    }

    pub fn record_attempt(&mut self, platform: Platform, success: bool, at: DateTime<Utc>) {
        self.platform_stats
            .entry(platform)
            .or_default()
            .record(success, at);
        if success {
            self.total_wins += 1;
        }
    }
}
