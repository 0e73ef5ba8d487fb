use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named aggressiveness profile selecting the strike strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Cautious: few agents, spread-out timing.
    Stealth,
    /// Aggressive: many agents fired almost at once.
    Beast,
    /// Maximum caution: a single high-tier agent.
    UltraStealth,
    /// Self-tuning: timing follows the adaptive feedback loop.
    Adaptive,
    /// Balanced default.
    Hybrid,
}

impl OperatingMode {
    pub const ALL: [Self; 5] = [
        Self::Stealth,
        Self::Beast,
        Self::UltraStealth,
        Self::Adaptive,
        Self::Hybrid,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stealth => "stealth",
            Self::Beast => "beast",
            Self::UltraStealth => "ultra_stealth",
            Self::Adaptive => "adaptive",
            Self::Hybrid => "hybrid",
        }
    }
}

impl Default for OperatingMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "stealth" => Ok(Self::Stealth),
            "beast" => Ok(Self::Beast),
            "ultra_stealth" | "ultra" => Ok(Self::UltraStealth),
            "adaptive" => Ok(Self::Adaptive),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(anyhow::anyhow!("Invalid operating mode: {s}")),
        }
    }
}
