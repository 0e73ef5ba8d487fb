//! Adaptive timing feedback loop.
//!
//! [`TimingEngine`] is plain numeric state: exponential moving averages of
//! success, detection and response time, streak counters and the current
//! [`TimingPattern`]. In the running system it is owned by one task and
//! driven through a [`TimingHandle`], so no float is ever shared.

use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::models::{OperatingMode, TimingConfig};

const COMMAND_BUFFER: usize = 256;
const MAX_DELAY_SCALE: f64 = 4.0;
const MIN_DELAY_SCALE: f64 = 0.5;
const CAUTION_FACTOR: f64 = 1.5;
const RELAX_FACTOR: f64 = 0.95;
const HIGH_ACTIVITY_PER_MIN: f64 = 5.0;
const LOW_ACTIVITY_PER_MIN: f64 = 0.1;

/// Named timing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingPattern {
    Cautious,
    Normal,
    Eager,
}

impl TimingPattern {
    /// Per-action delay range in milliseconds.
    pub const fn action_range_ms(&self) -> (u64, u64) {
        match self {
            Self::Cautious => (800, 2_500),
            Self::Normal => (300, 1_200),
            Self::Eager => (100, 500),
        }
    }

    pub const fn interval_multiplier(&self) -> f64 {
        match self {
            Self::Cautious => 1.5,
            Self::Normal => 1.0,
            Self::Eager => 0.7,
        }
    }

    const fn more_cautious(self) -> Self {
        match self {
            Self::Eager => Self::Normal,
            Self::Normal | Self::Cautious => Self::Cautious,
        }
    }

    const fn more_eager(self) -> Self {
        match self {
            Self::Cautious => Self::Normal,
            Self::Normal | Self::Eager => Self::Eager,
        }
    }
}

impl fmt::Display for TimingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cautious => write!(f, "cautious"),
            Self::Normal => write!(f, "normal"),
            Self::Eager => write!(f, "eager"),
        }
    }
}

/// Read-only view of the feedback state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSnapshot {
    pub pattern: TimingPattern,
    pub success_rate: f64,
    pub detection_rate: f64,
    pub avg_response_ms: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub delay_scale: f64,
    pub samples: u64,
}

/// Feedback state and interval arithmetic.
#[derive(Debug, Clone)]
pub struct TimingEngine {
    config: TimingConfig,
    pattern: TimingPattern,
    success_ema: f64,
    detection_ema: f64,
    response_ema_ms: Option<f64>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    delay_scale: f64,
    samples: u64,
}

impl TimingEngine {
    pub fn new(config: TimingConfig) -> Self {
        Self {
            config,
            pattern: TimingPattern::Normal,
            success_ema: 0.5,
            detection_ema: 0.0,
            response_ema_ms: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            delay_scale: 1.0,
            samples: 0,
        }
    }

    pub const fn pattern(&self) -> TimingPattern {
        self.pattern
    }

    pub const fn delay_scale(&self) -> f64 {
        self.delay_scale
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            pattern: self.pattern,
            success_rate: self.success_ema,
            detection_rate: self.detection_ema,
            avg_response_ms: self.response_ema_ms.unwrap_or(0.0),
            consecutive_successes: self.consecutive_successes,
            consecutive_failures: self.consecutive_failures,
            delay_scale: self.delay_scale,
            samples: self.samples,
        }
    }

    /// Fold one outcome into the averages. Returns the new pattern on a switch.
    pub fn record_outcome(
        &mut self,
        success: bool,
        detected: bool,
        response_time: Duration,
    ) -> Option<TimingPattern> {
        let alpha = self.config.ema_alpha;
        let ema = |current: f64, sample: f64| alpha * sample + (1.0 - alpha) * current;

        self.samples += 1;
        self.success_ema = ema(self.success_ema, if success { 1.0 } else { 0.0 });
        self.detection_ema = ema(self.detection_ema, if detected { 1.0 } else { 0.0 });
        let response_ms = response_time.as_secs_f64() * 1000.0;
        self.response_ema_ms = Some(
            self.response_ema_ms
                .map_or(response_ms, |current| ema(current, response_ms)),
        );

        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }

        if self.consecutive_failures >= self.config.failure_streak_threshold {
            self.pattern = self.pattern.more_cautious();
            self.delay_scale = (self.delay_scale * CAUTION_FACTOR).min(MAX_DELAY_SCALE);
            self.reset_streaks();
            Some(self.pattern)
        } else if self.consecutive_successes >= self.config.success_streak_threshold {
            self.pattern = self.pattern.more_eager();
            self.delay_scale = (self.delay_scale * RELAX_FACTOR).max(MIN_DELAY_SCALE);
            self.reset_streaks();
            Some(self.pattern)
        } else {
            None
        }
    }

    fn reset_streaks(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }

    /// Minimum interval for `mode`.
    pub const fn floor(mode: OperatingMode) -> Duration {
        match mode {
            OperatingMode::Beast => Duration::from_millis(1_000),
            OperatingMode::Hybrid => Duration::from_millis(1_500),
            OperatingMode::Adaptive => Duration::from_millis(2_000),
            OperatingMode::Stealth | OperatingMode::UltraStealth => Duration::from_millis(3_000),
        }
    }

    fn mode_multiplier(&self, mode: OperatingMode) -> f64 {
        match mode {
            OperatingMode::Beast => 0.5,
            OperatingMode::Hybrid => 1.0,
            OperatingMode::Adaptive => self.pattern.interval_multiplier() * self.delay_scale,
            OperatingMode::Stealth => 1.5,
            OperatingMode::UltraStealth => 2.0,
        }
    }

    /// Interval before the next check, with `jitter_unit` in [-1, 1].
    pub fn compute_interval(
        &self,
        base: Duration,
        mode: OperatingMode,
        opportunity_rate_per_min: f64,
        jitter_unit: f64,
    ) -> Duration {
        let mut secs = base.as_secs_f64() * self.mode_multiplier(mode);

        if opportunity_rate_per_min >= HIGH_ACTIVITY_PER_MIN {
            secs *= 0.7;
        } else if opportunity_rate_per_min < LOW_ACTIVITY_PER_MIN {
            secs *= 1.3;
        }

        if self.detection_ema > self.config.detection_penalty_threshold {
            secs *= 2.0;
        }

        secs *= 1.0 + self.config.jitter * jitter_unit.clamp(-1.0, 1.0);

        Duration::from_secs_f64(secs.max(0.0)).max(Self::floor(mode))
    }

    /// `compute_interval` with random jitter.
    pub fn next_interval(&self, base: Duration, mode: OperatingMode, opportunity_rate_per_min: f64) -> Duration {
        let jitter_unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.compute_interval(base, mode, opportunity_rate_per_min, jitter_unit)
    }

    /// Random per-action delay from the current pattern, scaled by feedback.
    pub fn action_delay(&self) -> Duration {
        let (low, high) = self.pattern.action_range_ms();
        let ms = rand::thread_rng().gen_range(low..=high) as f64 * self.delay_scale;
        Duration::from_secs_f64(ms / 1000.0)
    }

    /// Move the engine into its own task.
    pub fn spawn(self, shutdown: CancellationToken) -> (TimingHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.snapshot());
        let task = tokio::spawn(self.run(rx, snapshot_tx, shutdown));
        (
            TimingHandle {
                tx,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<TimingCommand>,
        snapshot_tx: watch::Sender<TimingSnapshot>,
        shutdown: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                () = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                TimingCommand::Record {
                    success,
                    detected,
                    response_time,
                } => {
                    if let Some(pattern) = self.record_outcome(success, detected, response_time) {
                        info!(
                            pattern = %pattern,
                            delay_scale = self.delay_scale,
                            success_rate = self.success_ema,
                            "Timing pattern switched"
                        );
                    }
                    snapshot_tx.send_replace(self.snapshot());
                }
                TimingCommand::NextInterval {
                    base,
                    mode,
                    rate,
                    reply,
                } => {
                    let _ = reply.send(self.next_interval(base, mode, rate));
                }
                TimingCommand::ActionDelay { reply } => {
                    let _ = reply.send(self.action_delay());
                }
                TimingCommand::Flush { reply } => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        debug!(samples = self.samples, "Timing engine stopped");
    }
}

enum TimingCommand {
    Record {
        success: bool,
        detected: bool,
        response_time: Duration,
    },
    NextInterval {
        base: Duration,
        mode: OperatingMode,
        rate: f64,
        reply: oneshot::Sender<Duration>,
    },
    ActionDelay {
        reply: oneshot::Sender<Duration>,
    },
    Flush {
        reply: oneshot::Sender<TimingSnapshot>,
    },
}

/// Cloneable handle to the timing task.
#[derive(Clone)]
pub struct TimingHandle {
    tx: mpsc::Sender<TimingCommand>,
    snapshot: watch::Receiver<TimingSnapshot>,
}

impl TimingHandle {
    /// Fire-and-forget outcome report.
    pub fn record_outcome(&self, success: bool, detected: bool, response_time: Duration) {
        let command = TimingCommand::Record {
            success,
            detected,
            response_time,
        };
        if let Err(e) = self.tx.try_send(command) {
            warn!(error = %e, "Dropping timing outcome");
        }
    }

    /// Interval before the next monitor check. Falls back to the mode floor
    /// scaled base when the engine is gone.
    pub async fn next_interval(&self, base: Duration, mode: OperatingMode, rate: f64) -> Duration {
        let (reply, rx) = oneshot::channel();
        let command = TimingCommand::NextInterval {
            base,
            mode,
            rate,
            reply,
        };
        if self.tx.send(command).await.is_err() {
            return base.max(TimingEngine::floor(mode));
        }
        rx.await.unwrap_or_else(|_| base.max(TimingEngine::floor(mode)))
    }

    pub async fn action_delay(&self) -> Duration {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(TimingCommand::ActionDelay { reply }).await.is_err() {
            return Duration::ZERO;
        }
        rx.await.unwrap_or(Duration::ZERO)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> TimingSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot after every previously sent outcome is applied.
    pub async fn flush(&self) -> TimingSnapshot {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(TimingCommand::Flush { reply }).await.is_err() {
            return self.snapshot();
        }
        rx.await.unwrap_or_else(|_| self.snapshot())
    }
}
