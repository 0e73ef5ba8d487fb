pub mod agent;
pub mod config;
pub mod mode;
pub mod opportunity;

pub use agent::{Agent, AgentIdentity, PlatformStats, QualityTier};
pub use config::{
    AgentPoolConfig, CircuitBreakerSettings, Config, LoggingConfig, SchedulerConfig,
    StaggerPattern, StrategiesConfig, StrategyConfig, TimingConfig, MAX_COOLDOWN_SECS,
};
pub use mode::OperatingMode;
pub use opportunity::{Fingerprint, Opportunity, OpportunityStatus, Platform, Priority};
