//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::config::ConfigArgs;
use super::commands::simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "ticketstrike")]
#[command(about = "Ticketstrike - opportunity scheduler and strike coordinator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .ticketstrike/
    #[arg(short, long, global = true, env = "TICKETSTRIKE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline against simulated monitors and executors
    Simulate(SimulateArgs),

    /// Configuration commands
    Config(ConfigArgs),
}
