//! Simulation CLI command.
//!
//! Wires the real scheduler, coordinator and feedback loops to simulated
//! monitors and executors, runs for a fixed time and prints the outcome.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::load_config;
use crate::application::{
    MonitorLoop, OrchestratorStats, StrikeCoordinator, StrikeOrchestrator, StrikeOutcome,
    StrikeReport,
};
use crate::cli::output::TableFormatter;
use crate::domain::models::{Agent, AgentIdentity, OperatingMode, Platform, QualityTier};
use crate::infrastructure::simulation::{SimulatedExecutor, SimulatedMonitor, SimulationProfile};
use crate::services::{
    CircuitBreakerConfig, CircuitBreakerService, CircuitStats, CircuitTrippedEvent,
    InMemoryAgentRegistry, MetricsAggregator, OpportunityScheduler, SchedulerStats,
    StrikeMetrics, TimingEngine, TimingSnapshot,
};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// How long to run before shutting down
    #[arg(short, long, default_value = "30")]
    pub duration_secs: u64,

    /// Number of simulated execution agents
    #[arg(short, long, default_value = "12")]
    pub agents: usize,

    /// Operating mode (overrides configuration)
    #[arg(short, long)]
    pub mode: Option<OperatingMode>,

    /// Platforms to monitor (comma-separated)
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "ticketmaster,fansale,vivaticket,eventim"
    )]
    pub platforms: Vec<Platform>,

    /// Chance a single attempt wins its listing
    #[arg(long, default_value = "0.25")]
    pub win_probability: f64,

    /// Chance a single attempt is blocked by the platform
    #[arg(long, default_value = "0.05")]
    pub block_probability: f64,

    /// Print every finished strike as it happens
    #[arg(short, long)]
    pub verbose: bool,
}

/// Everything printed at the end of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub mode: OperatingMode,
    pub duration_secs: u64,
    pub orchestrator: OrchestratorStats,
    pub scheduler: SchedulerStats,
    pub metrics: StrikeMetrics,
    pub timing: TimingSnapshot,
    pub circuits: Vec<CircuitStats>,
    pub agents: Vec<Agent>,
}

pub async fn execute(args: SimulateArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.agents == 0 {
        anyhow::bail!("At least one agent is required");
    }
    if args.platforms.is_empty() {
        anyhow::bail!("At least one platform is required");
    }

    let shutdown = CancellationToken::new();
    let (metrics, metrics_task) = MetricsAggregator::spawn(shutdown.child_token());
    let (timing, timing_task) = TimingEngine::new(config.timing.clone()).spawn(shutdown.child_token());
    let (mode_tx, mode_rx) = watch::channel(config.mode);
    // Stopping the orchestrator must leave the feedback loops readable
    let pipeline = shutdown.child_token();

    let (trip_tx, mut trip_rx) = mpsc::channel::<CircuitTrippedEvent>(32);
    let circuit_breaker = Arc::new(
        CircuitBreakerService::new(CircuitBreakerConfig::from(&config.circuit_breaker))
            .with_event_sender(trip_tx),
    );
    let scheduler = Arc::new(
        OpportunityScheduler::new(&config.scheduler, mode_rx.clone())
            .with_circuit_breaker(Arc::clone(&circuit_breaker))
            .with_metrics(metrics.clone()),
    );
    let registry = Arc::new(InMemoryAgentRegistry::with_agents(simulated_agents(args.agents)));
    let executor = Arc::new(SimulatedExecutor::new(SimulationProfile {
        win_probability: args.win_probability.clamp(0.0, 1.0),
        block_probability: args.block_probability.clamp(0.0, 1.0),
        ..SimulationProfile::default()
    }));

    let coordinator = Arc::new(
        StrikeCoordinator::new(
            &config,
            registry.clone(),
            executor.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&circuit_breaker),
            mode_rx.clone(),
        )
        .with_timing(timing.clone())
        .with_metrics(metrics.clone())
        .with_shutdown(pipeline.clone()),
    );

    let monitors = args
        .platforms
        .iter()
        .map(|&platform| {
            MonitorLoop::new(
                Arc::new(SimulatedMonitor::new(platform)),
                Arc::clone(&scheduler),
                Arc::clone(&circuit_breaker),
                mode_rx.clone(),
                config.scheduler.base_check_interval(),
            )
            .with_timing(timing.clone())
            .with_metrics(metrics.clone())
        })
        .collect();

    let (report_tx, mut report_rx) = mpsc::channel::<StrikeReport>(256);
    let mut orchestrator = StrikeOrchestrator::new(
        &config.scheduler,
        coordinator,
        Arc::clone(&scheduler),
        mode_tx,
        pipeline,
    )
    .with_monitors(monitors)
    .with_report_sender(report_tx);

    let verbose = args.verbose && !json_mode;
    let report_printer = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            if verbose {
                println!("{}", describe(&report));
            }
        }
    });
    let trip_logger = tokio::spawn(async move {
        while let Some(event) = trip_rx.recv().await {
            warn!(
                source = %event.source,
                open_count = event.open_count,
                recovery_secs = event.recovery_timeout.num_seconds(),
                reason = event.last_failure.as_deref().unwrap_or("-"),
                "Circuit tripped"
            );
        }
    });

    if !json_mode {
        println!("Starting ticketstrike simulation");
        println!("   Mode: {}", config.mode);
        println!("   Agents: {}", args.agents);
        println!(
            "   Platforms: {}",
            args.platforms
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("   Duration: {}s", args.duration_secs);
        println!();
    }

    orchestrator.start().await?;

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!("Simulation time elapsed");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("Interrupted, shutting down");
        }
    }

    orchestrator.stop().await?;

    let summary = SimulationSummary {
        mode: orchestrator.mode(),
        duration_secs: args.duration_secs,
        orchestrator: orchestrator.get_stats().await,
        scheduler: scheduler.stats().await,
        metrics: metrics.flush().await,
        timing: timing.flush().await,
        circuits: circuit_breaker.stats().await,
        agents: registry.snapshot().await,
    };

    drop(orchestrator);
    shutdown.cancel();
    for (name, task) in [("metrics", metrics_task), ("timing", timing_task)] {
        if let Err(e) = task.await {
            warn!(task = name, error = ?e, "Feedback loop panicked");
        }
    }
    let _ = report_printer.await;
    trip_logger.abort();

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else {
        let formatter = TableFormatter::new();
        println!("{}", formatter.format_summary(&summary));
        println!("\n{}", formatter.format_sources(&summary.metrics, &summary.circuits));
        println!("\n{}", formatter.format_agents(&summary.agents, &summary.metrics));
        println!(
            "\nExecutor: {} attempts, {} wins",
            executor.attempts(),
            executor.wins()
        );
    }

    Ok(())
}

/// A varied pool: tiers cycle 1..=5 and identities rotate through a few profiles.
pub fn simulated_agents(count: usize) -> Vec<Agent> {
    const BROWSERS: [&str; 3] = ["chrome", "firefox", "safari"];
    const SYSTEMS: [&str; 3] = ["windows", "macos", "linux"];
    const LOCALES: [(&str, &str); 4] = [
        ("it-IT", "Europe/Rome"),
        ("de-DE", "Europe/Berlin"),
        ("en-GB", "Europe/London"),
        ("fr-FR", "Europe/Paris"),
    ];
    const VIEWPORTS: [&str; 3] = ["1920x1080", "1440x900", "1366x768"];

    (0..count)
        .map(|i| {
            let (locale, timezone) = LOCALES[i % LOCALES.len()];
            Agent::new(format!("agent-{:02}", i + 1), QualityTier::new((i % 5) as u8 + 1))
                .with_identity(AgentIdentity {
                    browser: BROWSERS[i % BROWSERS.len()].to_string(),
                    os: SYSTEMS[(i / 2) % SYSTEMS.len()].to_string(),
                    locale: locale.to_string(),
                    timezone: timezone.to_string(),
                    viewport: VIEWPORTS[(i / 3) % VIEWPORTS.len()].to_string(),
                })
        })
        .collect()
}

fn describe(report: &StrikeReport) -> String {
    let opportunity = &report.opportunity;
    let listing = format!(
        "{} {} / {} @ {:.0}",
        opportunity.source, opportunity.event_name, opportunity.section, opportunity.price
    );
    match &report.outcome {
        StrikeOutcome::Won { agent_id, elapsed } => {
            format!("WON       {listing} by {agent_id} in {}ms", elapsed.as_millis())
        }
        StrikeOutcome::Exhausted => format!(
            "MISSED    {listing} ({} agents, strike {})",
            report.attempts.len(),
            opportunity.strikes
        ),
        StrikeOutcome::NoAgents => format!("NO AGENTS {listing}"),
        StrikeOutcome::CircuitOpen { retry_after } => {
            format!("CIRCUIT   {listing} until {}", retry_after.format("%H:%M:%S"))
        }
        StrikeOutcome::Expired => format!("EXPIRED   {listing}"),
    }
}
