use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::mode::OperatingMode;

/// Longest cooldown or recovery timeout accepted anywhere (one week).
pub const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 3600;

/// Main configuration structure for ticketstrike
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Operating mode selecting the strike strategy
    #[serde(default)]
    pub mode: OperatingMode,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduler (priority processor) configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Per-source circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Adaptive timing feedback loop configuration
    #[serde(default)]
    pub timing: TimingConfig,

    /// Agent selection and cooldown configuration
    #[serde(default)]
    pub agents: AgentPoolConfig,

    /// Per-mode strike strategy parameters
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            timing: TimingConfig::default(),
            agents: AgentPoolConfig::default(),
            strategies: StrategiesConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Age below which an opportunity counts as fresh
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,

    /// Hard age ceiling after which an opportunity is dropped
    #[serde(default = "default_expiry_ceiling_secs")]
    pub expiry_ceiling_secs: u64,

    /// Strikes allowed per opportunity before it is exhausted
    #[serde(default = "default_max_strikes")]
    pub max_strikes_per_opportunity: u32,

    /// Delay before a failed opportunity becomes eligible again
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Back-off when no agent qualified for a strike
    #[serde(default = "default_no_agents_backoff_ms")]
    pub no_agents_backoff_ms: u64,

    /// How often a blocked `next()` re-examines deferred or gated entries
    #[serde(default = "default_recheck_interval_ms")]
    pub recheck_interval_ms: u64,

    /// Strikes running concurrently across all opportunities
    #[serde(default = "default_max_concurrent_strikes")]
    pub max_concurrent_strikes: usize,

    /// Base monitor check interval before adaptive adjustments
    #[serde(default = "default_base_check_interval_ms")]
    pub base_check_interval_ms: u64,
}

const fn default_freshness_window_secs() -> u64 {
    30
}

const fn default_expiry_ceiling_secs() -> u64 {
    600
}

const fn default_max_strikes() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    2_000
}

const fn default_no_agents_backoff_ms() -> u64 {
    5_000
}

const fn default_recheck_interval_ms() -> u64 {
    250
}

const fn default_max_concurrent_strikes() -> usize {
    4
}

const fn default_base_check_interval_ms() -> u64 {
    5_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window_secs(),
            expiry_ceiling_secs: default_expiry_ceiling_secs(),
            max_strikes_per_opportunity: default_max_strikes(),
            retry_delay_ms: default_retry_delay_ms(),
            no_agents_backoff_ms: default_no_agents_backoff_ms(),
            recheck_interval_ms: default_recheck_interval_ms(),
            max_concurrent_strikes: default_max_concurrent_strikes(),
            base_check_interval_ms: default_base_check_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub const fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub const fn expiry_ceiling(&self) -> Duration {
        Duration::from_secs(self.expiry_ceiling_secs)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub const fn no_agents_backoff(&self) -> Duration {
        Duration::from_millis(self.no_agents_backoff_ms)
    }

    pub const fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }

    pub const fn base_check_interval(&self) -> Duration {
        Duration::from_millis(self.base_check_interval_ms)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    /// Consecutive blocked outcomes that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Base time the circuit stays open before a trial
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Cap for the doubled recovery timeout
    #[serde(default = "default_max_recovery_timeout_secs")]
    pub max_recovery_timeout_secs: u64,

    /// Whether circuit breaking is active
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_recovery_timeout_secs() -> u64 {
    300
}

const fn default_max_recovery_timeout_secs() -> u64 {
    3_600
}

const fn default_true() -> bool {
    true
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            max_recovery_timeout_secs: default_max_recovery_timeout_secs(),
            enabled: true,
        }
    }
}

/// Adaptive timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// EMA decay factor
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,

    /// Consecutive failures that push toward caution
    #[serde(default = "default_failure_streak")]
    pub failure_streak_threshold: u32,

    /// Consecutive successes that relax timing
    #[serde(default = "default_success_streak")]
    pub success_streak_threshold: u32,

    /// Detection EMA above which intervals are doubled
    #[serde(default = "default_detection_threshold")]
    pub detection_penalty_threshold: f64,

    /// Relative jitter applied to intervals (0.2 = ±20%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_ema_alpha() -> f64 {
    0.1
}

const fn default_failure_streak() -> u32 {
    3
}

const fn default_success_streak() -> u32 {
    10
}

const fn default_detection_threshold() -> f64 {
    0.3
}

const fn default_jitter() -> f64 {
    0.2
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ema_alpha: default_ema_alpha(),
            failure_streak_threshold: default_failure_streak(),
            success_streak_threshold: default_success_streak(),
            detection_penalty_threshold: default_detection_threshold(),
            jitter: default_jitter(),
        }
    }
}

/// Agent pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentPoolConfig {
    /// Cooldown applied to an agent after a blocked attempt
    #[serde(default = "default_blocked_cooldown_secs")]
    pub blocked_cooldown_secs: u64,

    /// Amplitude of the zero-mean exploration noise in agent selection
    #[serde(default = "default_noise_amplitude")]
    pub selection_noise: f64,
}

const fn default_blocked_cooldown_secs() -> u64 {
    1_800
}

const fn default_noise_amplitude() -> f64 {
    0.05
}

impl Default for AgentPoolConfig {
    fn default() -> Self {
        Self {
            blocked_cooldown_secs: default_blocked_cooldown_secs(),
            selection_noise: default_noise_amplitude(),
        }
    }
}

impl AgentPoolConfig {
    pub const fn blocked_cooldown(&self) -> Duration {
        Duration::from_secs(self.blocked_cooldown_secs)
    }
}

/// How the agents of one strike are spaced in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StaggerPattern {
    /// Agent `i` waits `i * step_ms`
    Linear { step_ms: u64 },
    /// Agents are spread evenly across `window_ms`
    Spread { window_ms: u64 },
}

/// Strike parameters for one operating mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StrategyConfig {
    pub max_parallel_agents: usize,
    pub min_quality_tier: u8,
    pub strike_timeout_secs: u64,
    pub stagger: StaggerPattern,
    pub early_termination_on_success: bool,
    pub success_cooldown_secs: u64,
    pub failure_cooldown_secs: u64,
}

/// Strategy parameters for every operating mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StrategiesConfig {
    #[serde(default = "default_stealth")]
    pub stealth: StrategyConfig,
    #[serde(default = "default_beast")]
    pub beast: StrategyConfig,
    #[serde(default = "default_ultra_stealth")]
    pub ultra_stealth: StrategyConfig,
    #[serde(default = "default_adaptive")]
    pub adaptive: StrategyConfig,
    #[serde(default = "default_hybrid")]
    pub hybrid: StrategyConfig,
}

impl StrategiesConfig {
    pub const fn for_mode(&self, mode: OperatingMode) -> &StrategyConfig {
        match mode {
            OperatingMode::Stealth => &self.stealth,
            OperatingMode::Beast => &self.beast,
            OperatingMode::UltraStealth => &self.ultra_stealth,
            OperatingMode::Adaptive => &self.adaptive,
            OperatingMode::Hybrid => &self.hybrid,
        }
    }

    pub fn for_mode_mut(&mut self, mode: OperatingMode) -> &mut StrategyConfig {
        match mode {
            OperatingMode::Stealth => &mut self.stealth,
            OperatingMode::Beast => &mut self.beast,
            OperatingMode::UltraStealth => &mut self.ultra_stealth,
            OperatingMode::Adaptive => &mut self.adaptive,
            OperatingMode::Hybrid => &mut self.hybrid,
        }
    }
}

fn default_stealth() -> StrategyConfig {
    StrategyConfig {
        max_parallel_agents: 2,
        min_quality_tier: 3,
        strike_timeout_secs: 45,
        stagger: StaggerPattern::Spread { window_ms: 4_000 },
        early_termination_on_success: true,
        success_cooldown_secs: 60,
        failure_cooldown_secs: 180,
    }
}

fn default_beast() -> StrategyConfig {
    StrategyConfig {
        max_parallel_agents: 8,
        min_quality_tier: 1,
        strike_timeout_secs: 20,
        stagger: StaggerPattern::Linear { step_ms: 50 },
        early_termination_on_success: false,
        success_cooldown_secs: 5,
        failure_cooldown_secs: 15,
    }
}

fn default_ultra_stealth() -> StrategyConfig {
    StrategyConfig {
        max_parallel_agents: 1,
        min_quality_tier: 4,
        strike_timeout_secs: 60,
        stagger: StaggerPattern::Spread { window_ms: 8_000 },
        early_termination_on_success: true,
        success_cooldown_secs: 300,
        failure_cooldown_secs: 900,
    }
}

fn default_adaptive() -> StrategyConfig {
    StrategyConfig {
        max_parallel_agents: 3,
        min_quality_tier: 2,
        strike_timeout_secs: 30,
        stagger: StaggerPattern::Linear { step_ms: 500 },
        early_termination_on_success: true,
        success_cooldown_secs: 20,
        failure_cooldown_secs: 60,
    }
}

fn default_hybrid() -> StrategyConfig {
    StrategyConfig {
        max_parallel_agents: 4,
        min_quality_tier: 2,
        strike_timeout_secs: 30,
        stagger: StaggerPattern::Linear { step_ms: 250 },
        early_termination_on_success: true,
        success_cooldown_secs: 15,
        failure_cooldown_secs: 45,
    }
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            stealth: default_stealth(),
            beast: default_beast(),
            ultra_stealth: default_ultra_stealth(),
            adaptive: default_adaptive(),
            hybrid: default_hybrid(),
        }
    }
}
