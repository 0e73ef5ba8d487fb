//! Strike metrics aggregator.
//!
//! A single task owns every counter. Producers send fire-and-forget
//! [`MetricsEvent`]s through a cloneable [`MetricsHandle`]; readers get the
//! latest [`StrikeMetrics`] snapshot from a watch channel.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::Platform;

const EVENT_BUFFER: usize = 1024;
const RATE_WINDOW_SECS: i64 = 60;
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// How a single agent attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Success,
    Failure,
    Blocked,
    Timeout,
    /// Stopped by early termination before it finished.
    Cancelled,
}

/// One finished strike, as reported by the coordinator.
#[derive(Debug, Clone)]
pub struct StrikeRecord {
    pub source: Platform,
    pub winner: Option<String>,
    /// Time from the go signal to the outcome.
    pub elapsed: Duration,
    pub attempts: Vec<AttemptKind>,
}

/// Outcome events accepted by the aggregator.
#[derive(Debug, Clone)]
pub enum MetricsEvent {
    /// A monitor observation reached the scheduler.
    Observed { source: Platform, at: DateTime<Utc> },
    Merged { source: Platform },
    Expired { source: Platform },
    NoAgents { source: Platform },
    CircuitRejected { source: Platform },
    StrikeCompleted(StrikeRecord),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptTotals {
    pub success: u64,
    pub failure: u64,
    pub blocked: u64,
    pub timeout: u64,
    pub cancelled: u64,
}

impl AttemptTotals {
    fn record(&mut self, kind: AttemptKind) {
        match kind {
            AttemptKind::Success => self.success += 1,
            AttemptKind::Failure => self.failure += 1,
            AttemptKind::Blocked => self.blocked += 1,
            AttemptKind::Timeout => self.timeout += 1,
            AttemptKind::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure + self.blocked + self.timeout + self.cancelled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceStats {
    pub strikes: u64,
    pub wins: u64,
    pub observed: u64,
    pub merged: u64,
    pub expired: u64,
    /// Observations over the last minute.
    pub recent_rate_per_min: f64,
}

/// Process-lifetime strike statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrikeMetrics {
    pub total_strikes: u64,
    pub successes: u64,
    pub failures: u64,
    /// Running mean of strike duration.
    pub avg_response_time_ms: f64,
    pub fastest_strike_ms: Option<u64>,
    pub per_agent_win_count: BTreeMap<String, u32>,
    pub attempts: AttemptTotals,
    pub observed_total: u64,
    pub merged_total: u64,
    pub expired_total: u64,
    pub no_agents_total: u64,
    pub circuit_rejected_total: u64,
    pub per_source: BTreeMap<Platform, SourceStats>,
}

impl StrikeMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_strikes == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_strikes as f64
        }
    }

    /// Observations per minute for `source` over the rolling window.
    pub fn opportunity_rate(&self, source: Platform) -> f64 {
        self.per_source
            .get(&source)
            .map_or(0.0, |s| s.recent_rate_per_min)
    }
}

enum Command {
    Event(MetricsEvent),
    Flush(oneshot::Sender<StrikeMetrics>),
}

/// Cloneable sender side of the aggregator.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<StrikeMetrics>,
}

impl MetricsHandle {
    /// Fire-and-forget; dropped with a warning when the buffer is full.
    pub fn record(&self, event: MetricsEvent) {
        if let Err(e) = self.tx.try_send(Command::Event(event)) {
            warn!(error = %e, "Dropping metrics event");
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StrikeMetrics {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StrikeMetrics> {
        self.snapshot.clone()
    }

    /// Wait until every event sent before this call is applied.
    pub async fn flush(&self) -> StrikeMetrics {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(reply_tx)).await.is_err() {
            return self.snapshot();
        }
        reply_rx.await.unwrap_or_else(|_| self.snapshot())
    }
}

/// Owner of the metrics state.
pub struct MetricsAggregator {
    metrics: StrikeMetrics,
    observations: HashMap<Platform, VecDeque<DateTime<Utc>>>,
}

impl MetricsAggregator {
    /// Spawn the aggregator task; it exits on `shutdown` or when every handle is dropped.
    pub fn spawn(shutdown: CancellationToken) -> (MetricsHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(StrikeMetrics::default());

        let aggregator = Self {
            metrics: StrikeMetrics::default(),
            observations: HashMap::new(),
        };
        let task = tokio::spawn(aggregator.run(rx, snapshot_tx, shutdown));

        (
            MetricsHandle {
                tx,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        snapshot_tx: watch::Sender<StrikeMetrics>,
        shutdown: CancellationToken,
    ) {
        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(Command::Event(event)) => {
                        self.apply(event);
                        self.publish(&snapshot_tx);
                    }
                    Some(Command::Flush(reply)) => {
                        self.refresh_rates(Utc::now());
                        self.publish(&snapshot_tx);
                        let _ = reply.send(self.metrics.clone());
                    }
                    None => break,
                },
                _ = refresh.tick() => {
                    self.refresh_rates(Utc::now());
                    self.publish(&snapshot_tx);
                }
            }
        }

        // Drain what is already buffered so the final snapshot is complete
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Event(event) => self.apply(event),
                Command::Flush(reply) => {
                    let _ = reply.send(self.metrics.clone());
                }
            }
        }
        self.publish(&snapshot_tx);
        debug!(total_strikes = self.metrics.total_strikes, "Metrics aggregator stopped");
    }

    fn publish(&self, snapshot_tx: &watch::Sender<StrikeMetrics>) {
        snapshot_tx.send_replace(self.metrics.clone());
    }

    fn apply(&mut self, event: MetricsEvent) {
        match event {
            MetricsEvent::Observed { source, at } => {
                self.metrics.observed_total += 1;
                self.metrics.per_source.entry(source).or_default().observed += 1;
                self.observations.entry(source).or_default().push_back(at);
                self.refresh_rates(Utc::now());
            }
            MetricsEvent::Merged { source } => {
                self.metrics.merged_total += 1;
                self.metrics.per_source.entry(source).or_default().merged += 1;
            }
            MetricsEvent::Expired { source } => {
                self.metrics.expired_total += 1;
                self.metrics.per_source.entry(source).or_default().expired += 1;
            }
            MetricsEvent::NoAgents { .. } => self.metrics.no_agents_total += 1,
            MetricsEvent::CircuitRejected { .. } => self.metrics.circuit_rejected_total += 1,
            MetricsEvent::StrikeCompleted(record) => self.apply_strike(record),
        }
    }

    fn apply_strike(&mut self, record: StrikeRecord) {
        let metrics = &mut self.metrics;
        metrics.total_strikes += 1;

        let elapsed_ms = record.elapsed.as_millis() as u64;
        let n = metrics.total_strikes as f64;
        metrics.avg_response_time_ms += (elapsed_ms as f64 - metrics.avg_response_time_ms) / n;

        for kind in &record.attempts {
            metrics.attempts.record(*kind);
        }

        let source_stats = metrics.per_source.entry(record.source).or_default();
        source_stats.strikes += 1;

        if let Some(winner) = record.winner {
            metrics.successes += 1;
            source_stats.wins += 1;
            *metrics.per_agent_win_count.entry(winner).or_insert(0) += 1;
            metrics.fastest_strike_ms = Some(
                metrics
                    .fastest_strike_ms
                    .map_or(elapsed_ms, |fastest| fastest.min(elapsed_ms)),
            );
        } else {
            metrics.failures += 1;
        }
    }

    fn refresh_rates(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(RATE_WINDOW_SECS);
        for (source, window) in &mut self.observations {
            // Observation timestamps are not guaranteed to arrive in order
            window.retain(|at| *at >= cutoff);
            let per_minute = window.len() as f64 * 60.0 / RATE_WINDOW_SECS as f64;
            self.metrics.per_source.entry(*source).or_default().recent_rate_per_min = per_minute;
        }
    }
}
