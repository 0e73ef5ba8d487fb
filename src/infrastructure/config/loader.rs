use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::{Config, OperatingMode, MAX_COOLDOWN_SECS};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid expiry ceiling: {ceiling}s must exceed the freshness window of {freshness}s")]
    InvalidExpiry { freshness: u64, ceiling: u64 },

    #[error("Invalid max_strikes_per_opportunity: {0}. Must be at least 1")]
    InvalidMaxStrikes(u32),

    #[error("Invalid max_concurrent_strikes: {0}. Must be between 1 and 64")]
    InvalidConcurrency(usize),

    #[error("Invalid failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error(
        "Invalid recovery configuration: recovery_timeout_secs ({0}) must not exceed max_recovery_timeout_secs ({1})"
    )]
    InvalidRecovery(u64, u64),

    #[error("Invalid {field}: {value}. Must be within [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid {field}: {value}s exceeds the {max}s limit")]
    DurationTooLong {
        field: String,
        value: u64,
        max: u64,
    },

    #[error("Invalid strategy for {mode}: {reason}")]
    InvalidStrategy { mode: OperatingMode, reason: String },
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .ticketstrike/config.yaml
    /// 3. .ticketstrike/local.yaml (optional local overrides)
    /// 4. Environment variables (TICKETSTRIKE_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, environment still wins
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("TICKETSTRIKE_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".ticketstrike/config.yaml"))
            .merge(Yaml::file(".ticketstrike/local.yaml"))
            .merge(Env::prefixed("TICKETSTRIKE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let scheduler = &config.scheduler;
        if scheduler.expiry_ceiling_secs <= scheduler.freshness_window_secs {
            return Err(ConfigError::InvalidExpiry {
                freshness: scheduler.freshness_window_secs,
                ceiling: scheduler.expiry_ceiling_secs,
            });
        }
        if scheduler.max_strikes_per_opportunity == 0 {
            return Err(ConfigError::InvalidMaxStrikes(
                scheduler.max_strikes_per_opportunity,
            ));
        }
        if scheduler.max_concurrent_strikes == 0 || scheduler.max_concurrent_strikes > 64 {
            return Err(ConfigError::InvalidConcurrency(
                scheduler.max_concurrent_strikes,
            ));
        }

        let circuit = &config.circuit_breaker;
        if circuit.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(circuit.failure_threshold));
        }
        if circuit.recovery_timeout_secs > circuit.max_recovery_timeout_secs {
            return Err(ConfigError::InvalidRecovery(
                circuit.recovery_timeout_secs,
                circuit.max_recovery_timeout_secs,
            ));
        }

        check_duration(
            "circuit_breaker.max_recovery_timeout_secs",
            circuit.max_recovery_timeout_secs,
        )?;
        check_duration("agents.blocked_cooldown_secs", config.agents.blocked_cooldown_secs)?;

        check_range("timing.ema_alpha", config.timing.ema_alpha, 0.0, 1.0)?;
        check_range("timing.jitter", config.timing.jitter, 0.0, 1.0)?;
        check_range(
            "timing.detection_penalty_threshold",
            config.timing.detection_penalty_threshold,
            0.0,
            1.0,
        )?;
        check_range("agents.selection_noise", config.agents.selection_noise, 0.0, 0.5)?;

        for mode in OperatingMode::ALL {
            let strategy = config.strategies.for_mode(mode);
            let invalid = |reason: &str| ConfigError::InvalidStrategy {
                mode,
                reason: reason.to_string(),
            };

            if strategy.max_parallel_agents == 0 || strategy.max_parallel_agents > 10 {
                return Err(invalid("max_parallel_agents must be between 1 and 10"));
            }
            if !(1..=5).contains(&strategy.min_quality_tier) {
                return Err(invalid("min_quality_tier must be between 1 and 5"));
            }
            if strategy.strike_timeout_secs == 0 {
                return Err(invalid("strike_timeout_secs must be positive"));
            }
            check_duration(
                &format!("strategies.{mode}.success_cooldown_secs"),
                strategy.success_cooldown_secs,
            )?;
            check_duration(
                &format!("strategies.{mode}.failure_cooldown_secs"),
                strategy.failure_cooldown_secs,
            )?;
        }

        Ok(())
    }
}

fn check_duration(field: &str, value: u64) -> Result<(), ConfigError> {
    if value > MAX_COOLDOWN_SECS {
        return Err(ConfigError::DurationTooLong {
            field: field.to_string(),
            value,
            max: MAX_COOLDOWN_SECS,
        });
    }
    Ok(())
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
