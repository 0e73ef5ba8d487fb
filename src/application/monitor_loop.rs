use backoff::ExponentialBackoffBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::MonitorError;
use crate::domain::models::{OperatingMode, Opportunity, Platform};
use crate::domain::ports::Monitor;
use crate::services::{
    CircuitBreakerService, MetricsHandle, OpportunityScheduler, SubmitOutcome, TimingHandle,
};

/// Result of one pass of a monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSummary {
    pub found: usize,
    pub queued: usize,
    pub merged: usize,
    pub expired: usize,
    /// Skipped because the platform circuit was open.
    pub skipped: bool,
}

/// Long-lived polling loop for one monitor.
///
/// Each pass checks the platform, submits every listing to the scheduler
/// and sleeps for the adaptive interval. Transient errors are retried with
/// exponential backoff inside one pass; `Blocked` counts against the
/// platform circuit; `Fatal` ends the loop.
pub struct MonitorLoop {
    monitor: Arc<dyn Monitor>,
    scheduler: Arc<OpportunityScheduler>,
    circuit_breaker: Arc<CircuitBreakerService>,
    timing: Option<TimingHandle>,
    metrics: Option<MetricsHandle>,
    mode: watch::Receiver<OperatingMode>,
    base_interval: Duration,
}

impl MonitorLoop {
    const RETRY_INITIAL: Duration = Duration::from_millis(200);
    const RETRY_MAX_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(
        monitor: Arc<dyn Monitor>,
        scheduler: Arc<OpportunityScheduler>,
        circuit_breaker: Arc<CircuitBreakerService>,
        mode: watch::Receiver<OperatingMode>,
        base_interval: Duration,
    ) -> Self {
        Self {
            monitor,
            scheduler,
            circuit_breaker,
            timing: None,
            metrics: None,
            mode,
            base_interval,
        }
    }

    #[must_use]
    pub fn with_timing(mut self, timing: TimingHandle) -> Self {
        self.timing = Some(timing);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn platform(&self) -> Platform {
        self.monitor.platform()
    }

    /// Run until `shutdown` fires or the monitor reports a fatal error.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let platform = self.platform();
            info!(%platform, "Monitor loop started");

            loop {
                let pass = tokio::select! {
                    () = shutdown.cancelled() => break,
                    pass = self.poll_once() => pass,
                };

                match pass {
                    Ok(summary) if summary.found > 0 => {
                        debug!(
                            %platform,
                            found = summary.found,
                            queued = summary.queued,
                            merged = summary.merged,
                            "Monitor pass submitted listings"
                        );
                    }
                    Ok(_) => {}
                    Err(MonitorError::Fatal(reason)) => {
                        error!(%platform, %reason, "Monitor failed, stopping loop");
                        break;
                    }
                    Err(e) => warn!(%platform, error = %e, "Monitor pass failed"),
                }

                let interval = self.next_interval().await;
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }

            info!(%platform, "Monitor loop stopped");
        })
    }

    /// One check of the platform followed by submission of its listings.
    pub async fn poll_once(&self) -> Result<PollSummary, MonitorError> {
        let platform = self.platform();

        if self.circuit_breaker.is_blocked(platform).await {
            debug!(%platform, "Circuit open, skipping poll");
            return Ok(PollSummary {
                skipped: true,
                ..PollSummary::default()
            });
        }

        let listings = match self.check_with_retry().await {
            Ok(listings) => listings,
            Err(MonitorError::Blocked(reason)) => {
                self.circuit_breaker
                    .record_failure(platform, reason.clone())
                    .await;
                return Err(MonitorError::Blocked(reason));
            }
            Err(e) => return Err(e),
        };

        Ok(self.submit_all(listings).await)
    }

    async fn check_with_retry(&self) -> Result<Vec<Opportunity>, MonitorError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Self::RETRY_INITIAL)
            .with_max_interval(Self::RETRY_MAX_INTERVAL)
            .with_max_elapsed_time(Some(self.base_interval.max(Self::RETRY_MAX_INTERVAL)))
            .build();

        backoff::future::retry(policy, move || async move {
            self.monitor.check().await.map_err(|e| match e {
                MonitorError::Transient(_) => {
                    debug!(platform = %self.platform(), error = %e, "Transient monitor error, retrying");
                    backoff::Error::transient(e)
                }
                other => backoff::Error::permanent(other),
            })
        })
        .await
    }

    async fn submit_all(&self, listings: Vec<Opportunity>) -> PollSummary {
        let mut summary = PollSummary {
            found: listings.len(),
            ..PollSummary::default()
        };

        for opportunity in listings {
            match self.scheduler.submit(opportunity).await {
                SubmitOutcome::Queued => summary.queued += 1,
                SubmitOutcome::Merged { .. } | SubmitOutcome::MergedInFlight { .. } => {
                    summary.merged += 1;
                }
                SubmitOutcome::Expired => summary.expired += 1,
            }
        }

        summary
    }

    async fn next_interval(&self) -> Duration {
        let mode = *self.mode.borrow();
        let Some(timing) = &self.timing else {
            return self.base_interval;
        };
        let rate = self
            .metrics
            .as_ref()
            .map_or(0.0, |m| m.snapshot().opportunity_rate(self.platform()));
        timing.next_interval(self.base_interval, mode, rate).await
    }
}
