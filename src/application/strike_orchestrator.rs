//! Strike Orchestrator with Background Dispatch
//!
//! Pulls the best ready opportunity from the scheduler, runs a bounded number
//! of strikes concurrently and decides what happens to each opportunity
//! afterwards.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::monitor_loop::MonitorLoop;
use super::strike_coordinator::{StrikeCoordinator, StrikeOutcome, StrikeReport};
use crate::domain::models::{OperatingMode, OpportunityStatus, SchedulerConfig};
use crate::services::OpportunityScheduler;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What happens to an opportunity after a strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back into the queue once the delay passes.
    Requeue(Duration),
    /// Done for good.
    Terminal(OpportunityStatus),
}

impl Disposition {
    /// Retry and back-off policy for a finished strike.
    pub fn for_report(report: &StrikeReport, config: &SchedulerConfig) -> Self {
        match &report.outcome {
            StrikeOutcome::Won { .. } => Self::Terminal(OpportunityStatus::Won),
            StrikeOutcome::Expired => Self::Terminal(OpportunityStatus::Expired),
            StrikeOutcome::Exhausted => {
                if report.opportunity.strikes < config.max_strikes_per_opportunity {
                    Self::Requeue(config.retry_delay())
                } else {
                    Self::Terminal(OpportunityStatus::Exhausted)
                }
            }
            StrikeOutcome::NoAgents => Self::Requeue(config.no_agents_backoff()),
            StrikeOutcome::CircuitOpen { retry_after } => {
                let wait = (*retry_after - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                Self::Requeue(wait.max(config.recheck_interval()))
            }
        }
    }
}

/// Running totals of strike dispositions.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub state: OrchestratorState,
    pub mode: OperatingMode,
    pub max_concurrent_strikes: usize,
    pub active_strikes: usize,
    pub strikes_dispatched: u64,
    pub won: u64,
    pub exhausted: u64,
    pub expired: u64,
    pub requeued: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: u64,
    won: u64,
    exhausted: u64,
    expired: u64,
    requeued: u64,
}

/// Strike orchestrator with concurrent dispatch
///
/// Uses tokio primitives:
/// - Semaphore bounding concurrent strikes
/// - `JoinSet` tracking in-flight strikes
/// - `CancellationToken` for shutdown, shared with the coordinator and monitors
/// - watch channel carrying the operating mode
///
/// # Examples
///
/// ```no_run
/// use ticketstrike::application::{StrikeCoordinator, StrikeOrchestrator};
/// use ticketstrike::domain::models::{OperatingMode, SchedulerConfig};
/// use ticketstrike::services::OpportunityScheduler;
/// use std::sync::Arc;
/// use tokio::sync::watch;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(
/// #     coordinator: Arc<StrikeCoordinator>,
/// #     scheduler: Arc<OpportunityScheduler>,
/// #     mode_tx: watch::Sender<OperatingMode>,
/// # ) -> anyhow::Result<()> {
/// let mut orchestrator = StrikeOrchestrator::new(
///     &SchedulerConfig::default(),
///     coordinator,
///     scheduler,
///     mode_tx,
///     CancellationToken::new(),
/// );
///
/// orchestrator.start().await?;
/// orchestrator.set_mode(OperatingMode::Beast);
///
/// let stats = orchestrator.get_stats().await;
/// println!("Active strikes: {}", stats.active_strikes);
///
/// orchestrator.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct StrikeOrchestrator {
    state: Arc<RwLock<OrchestratorState>>,
    counters: Arc<RwLock<Counters>>,
    config: SchedulerConfig,
    strike_semaphore: Arc<Semaphore>,

    coordinator: Arc<StrikeCoordinator>,
    scheduler: Arc<OpportunityScheduler>,
    mode_tx: watch::Sender<OperatingMode>,
    monitors: Vec<MonitorLoop>,
    report_tx: Option<mpsc::Sender<StrikeReport>>,

    shutdown: CancellationToken,
    dispatch_handle: Option<JoinHandle<()>>,
    monitor_handles: Vec<JoinHandle<()>>,
}

impl StrikeOrchestrator {
    pub fn new(
        config: &SchedulerConfig,
        coordinator: Arc<StrikeCoordinator>,
        scheduler: Arc<OpportunityScheduler>,
        mode_tx: watch::Sender<OperatingMode>,
        shutdown: CancellationToken,
    ) -> Self {
        let max_concurrent = config.max_concurrent_strikes.max(1);
        Self {
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            counters: Arc::new(RwLock::new(Counters::default())),
            config: config.clone(),
            strike_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            coordinator,
            scheduler,
            mode_tx,
            monitors: Vec::new(),
            report_tx: None,
            shutdown,
            dispatch_handle: None,
            monitor_handles: Vec::new(),
        }
    }

    /// Monitor loops started and stopped with the orchestrator.
    #[must_use]
    pub fn with_monitors(mut self, monitors: Vec<MonitorLoop>) -> Self {
        self.monitors = monitors;
        self
    }

    /// Every finished strike report is also sent here.
    #[must_use]
    pub fn with_report_sender(mut self, sender: mpsc::Sender<StrikeReport>) -> Self {
        self.report_tx = Some(sender);
        self
    }

    /// Switch the operating mode; running strikes keep their strategy.
    pub fn set_mode(&self, mode: OperatingMode) {
        let previous = self.mode_tx.send_replace(mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Operating mode changed");
        }
    }

    pub fn mode(&self) -> OperatingMode {
        *self.mode_tx.borrow()
    }

    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Start the monitor loops and the dispatch loop.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Strike orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }

        info!(
            max_concurrent_strikes = self.config.max_concurrent_strikes,
            monitors = self.monitors.len(),
            mode = %self.mode(),
            "Starting strike orchestrator"
        );

        for monitor in self.monitors.drain(..) {
            self.monitor_handles
                .push(monitor.spawn(self.shutdown.child_token()));
        }

        self.dispatch_handle = Some(self.spawn_dispatch_loop());

        *self.state.write().await = OrchestratorState::Running;
        info!("Strike orchestrator started");
        Ok(())
    }

    fn spawn_dispatch_loop(&self) -> JoinHandle<()> {
        let semaphore = Arc::clone(&self.strike_semaphore);
        let scheduler = Arc::clone(&self.scheduler);
        let coordinator = Arc::clone(&self.coordinator);
        let counters = Arc::clone(&self.counters);
        let report_tx = self.report_tx.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut strikes = JoinSet::new();

            loop {
                while let Some(joined) = strikes.try_join_next() {
                    if let Err(e) = joined {
                        warn!(error = ?e, "Strike task panicked");
                    }
                }

                // Permit first so a dequeued opportunity is never stranded in flight
                let permit = tokio::select! {
                    () = shutdown.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let opportunity = tokio::select! {
                    () = shutdown.cancelled() => break,
                    opportunity = scheduler.next() => opportunity,
                };

                counters.write().await.dispatched += 1;
                debug!(
                    fingerprint = %opportunity.fingerprint.short(),
                    source = %opportunity.source,
                    "Dispatching strike"
                );

                let coordinator = Arc::clone(&coordinator);
                let scheduler = Arc::clone(&scheduler);
                let counters = Arc::clone(&counters);
                let report_tx = report_tx.clone();
                let config = config.clone();
                let shutdown = shutdown.clone();

                strikes.spawn(async move {
                    let _permit = permit;
                    let report = coordinator.execute(opportunity).await;
                    let disposition = Disposition::for_report(&report, &config);

                    {
                        let mut counters = counters.write().await;
                        match disposition {
                            Disposition::Terminal(OpportunityStatus::Won) => counters.won += 1,
                            Disposition::Terminal(OpportunityStatus::Expired) => counters.expired += 1,
                            Disposition::Terminal(_) => counters.exhausted += 1,
                            Disposition::Requeue(_) if !shutdown.is_cancelled() => {
                                counters.requeued += 1;
                            }
                            Disposition::Requeue(_) => {}
                        }
                    }

                    match disposition {
                        Disposition::Requeue(delay) if !shutdown.is_cancelled() => {
                            let cause = report.error().map(|e| e.to_string()).unwrap_or_default();
                            debug!(
                                fingerprint = %report.opportunity.fingerprint.short(),
                                delay_ms = delay.as_millis() as u64,
                                strikes = report.opportunity.strikes,
                                cause = %cause,
                                "Requeueing opportunity"
                            );
                            scheduler
                                .submit_after(report.opportunity.clone(), delay)
                                .await;
                        }
                        Disposition::Requeue(_) => {}
                        Disposition::Terminal(status) => {
                            info!(
                                fingerprint = %report.opportunity.fingerprint.short(),
                                status = %status,
                                strikes = report.opportunity.strikes,
                                "Opportunity finished"
                            );
                        }
                    }

                    if let Some(tx) = report_tx {
                        let _ = tx.send(report).await;
                    }
                });
            }

            if !strikes.is_empty() {
                info!(active_strikes = strikes.len(), "Waiting for strikes to complete");
                let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
                    while let Some(joined) = strikes.join_next().await {
                        if let Err(e) = joined {
                            warn!(error = ?e, "Strike task panicked");
                        }
                    }
                })
                .await;

                if drained.is_err() {
                    warn!(remaining = strikes.len(), "Shutdown timeout reached, aborting strikes");
                    strikes.abort_all();
                }
            }

            debug!("Dispatch loop exited");
        })
    }

    /// Stop dispatching, cancel running strikes and wait for every loop.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            *state = OrchestratorState::Stopping;
        }

        info!("Stopping strike orchestrator");
        self.shutdown.cancel();

        if let Some(handle) = self.dispatch_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Dispatch loop stopped cleanly"),
                Ok(Err(e)) => warn!(error = ?e, "Dispatch loop panicked"),
                Err(_) => warn!("Dispatch loop shutdown timeout"),
            }
        }

        let monitors = futures::future::join_all(self.monitor_handles.drain(..));
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, monitors).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = ?e, "Monitor loop panicked");
                    }
                }
            }
            Err(_) => warn!("Monitor loop shutdown timeout"),
        }

        *self.state.write().await = OrchestratorState::Stopped;
        info!("Strike orchestrator stopped");
        Ok(())
    }

    /// Get current orchestrator statistics
    pub async fn get_stats(&self) -> OrchestratorStats {
        let state = *self.state.read().await;
        let counters = self.counters.read().await;
        let max = self.config.max_concurrent_strikes.max(1);

        OrchestratorStats {
            state,
            mode: self.mode(),
            max_concurrent_strikes: max,
            active_strikes: max.saturating_sub(self.strike_semaphore.available_permits()),
            strikes_dispatched: counters.dispatched,
            won: counters.won,
            exhausted: counters.exhausted,
            expired: counters.expired,
            requeued: counters.requeued,
        }
    }
}
