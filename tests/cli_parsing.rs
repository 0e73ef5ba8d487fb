use clap::Parser;
use std::path::PathBuf;
use ticketstrike::cli::commands::config::ConfigCommand;
use ticketstrike::cli::{Cli, Commands};
use ticketstrike::domain::models::{OperatingMode, Platform};

#[test]
fn test_parse_simulate_defaults() {
    let cli = Cli::try_parse_from(vec!["ticketstrike", "simulate"]).unwrap();

    assert!(!cli.json);
    match cli.command {
        Commands::Simulate(args) => {
            assert_eq!(args.duration_secs, 30);
            assert_eq!(args.agents, 12);
            assert!(args.mode.is_none());
            assert_eq!(args.platforms, Platform::ALL.to_vec());
            assert!((args.win_probability - 0.25).abs() < f64::EPSILON);
            assert!(!args.verbose);
        }
        Commands::Config(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_simulate_with_options() {
    let cli = Cli::try_parse_from(vec![
        "ticketstrike",
        "simulate",
        "--duration-secs",
        "5",
        "--agents",
        "4",
        "--mode",
        "ultra_stealth",
        "--platforms",
        "fansale,eventim",
        "--block-probability",
        "0.5",
        "--verbose",
    ])
    .unwrap();

    match cli.command {
        Commands::Simulate(args) => {
            assert_eq!(args.duration_secs, 5);
            assert_eq!(args.agents, 4);
            assert_eq!(args.mode, Some(OperatingMode::UltraStealth));
            assert_eq!(args.platforms, vec![Platform::Fansale, Platform::Eventim]);
            assert!((args.block_probability - 0.5).abs() < f64::EPSILON);
            assert!(args.verbose);
        }
        Commands::Config(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_rejects_unknown_mode() {
    let result = Cli::try_parse_from(vec!["ticketstrike", "simulate", "--mode", "turbo"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_rejects_unknown_platform() {
    let result = Cli::try_parse_from(vec!["ticketstrike", "simulate", "--platforms", "stubhub"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_config_show_with_global_flags() {
    let cli = Cli::try_parse_from(vec![
        "ticketstrike",
        "config",
        "show",
        "--json",
        "--config",
        "/etc/ticketstrike.yaml",
    ])
    .unwrap();

    assert!(cli.json);
    assert_eq!(cli.config, Some(PathBuf::from("/etc/ticketstrike.yaml")));
    match cli.command {
        Commands::Config(args) => assert!(matches!(args.command, ConfigCommand::Show)),
        Commands::Simulate(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_config_validate() {
    let cli = Cli::try_parse_from(vec!["ticketstrike", "config", "validate"]).unwrap();

    match cli.command {
        Commands::Config(args) => assert!(matches!(args.command, ConfigCommand::Validate)),
        Commands::Simulate(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_requires_subcommand() {
    assert!(Cli::try_parse_from(vec!["ticketstrike"]).is_err());
}
