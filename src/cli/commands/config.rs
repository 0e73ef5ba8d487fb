//! Configuration CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

use super::load_config;
use crate::domain::models::OperatingMode;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged configuration
    Show,
    /// Load and validate the configuration
    Validate,
}

pub fn execute(args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommand::Show => show(config_path, json_mode),
        ConfigCommand::Validate => validate(config_path, json_mode),
    }
}

fn show(config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?
        );
    } else {
        print!(
            "{}",
            serde_yaml::to_string(&config).context("Failed to serialize configuration")?
        );
    }
    Ok(())
}

fn validate(config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let strategy = config.strategies.for_mode(config.mode);

    if json_mode {
        println!(
            "{}",
            serde_json::json!({
                "valid": true,
                "mode": config.mode,
                "modes": OperatingMode::ALL,
            })
        );
    } else {
        println!("Configuration is valid");
        println!("   Mode: {}", config.mode);
        println!(
            "   Strategy: {} agents, min tier {}, timeout {}s",
            strategy.max_parallel_agents, strategy.min_quality_tier, strategy.strike_timeout_secs
        );
        println!(
            "   Scheduler: {} concurrent strikes, {} strikes per opportunity",
            config.scheduler.max_concurrent_strikes, config.scheduler.max_strikes_per_opportunity
        );
    }
    Ok(())
}
