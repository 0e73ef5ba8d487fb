//! Ticketstrike CLI entry point.

use clap::Parser;

use ticketstrike::cli::commands::{self, load_config};
use ticketstrike::cli::{Cli, Commands};
use ticketstrike::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // A broken config is reported by the command itself
    let log_config = load_config(config_path)
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        }
    };

    let result = match cli.command {
        Commands::Simulate(args) => commands::simulate::execute(args, config_path, cli.json).await,
        Commands::Config(args) => commands::config::execute(args, config_path, cli.json),
    };

    if let Err(err) = result {
        ticketstrike::cli::handle_error(err, cli.json);
    }
}
