use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::StrikeError;
use crate::domain::models::{
    Agent, Config, OperatingMode, Opportunity, StrategiesConfig, MAX_COOLDOWN_SECS,
};
use crate::domain::ports::{AgentProvider, AttemptContext, ClaimExecutor};
use crate::services::{
    AttemptKind, CircuitBreakerService, CircuitCheckResult, MetricsEvent, MetricsHandle,
    OpportunityScheduler, QuantumSelector, Strategy, StrikeRecord, TimingHandle,
};

/// Overall result of one strike.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StrikeOutcome {
    /// An agent confirmed the claim.
    Won { agent_id: String, elapsed: Duration },
    /// Every selected agent failed.
    Exhausted,
    /// No agent qualified; the caller backs off and requeues.
    NoAgents,
    /// The source circuit refused the strike.
    CircuitOpen { retry_after: DateTime<Utc> },
    /// Past the expiry ceiling before the strike started.
    Expired,
}

impl StrikeOutcome {
    pub const fn is_won(&self) -> bool {
        matches!(self, Self::Won { .. })
    }
}

/// How one agent's attempt ended.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub agent_id: String,
    pub index: usize,
    pub kind: AttemptKind,
    pub error: Option<StrikeError>,
    /// Time from the go signal until the attempt finished.
    pub elapsed: Duration,
}

/// Everything the caller needs after a strike.
#[derive(Debug, Clone)]
pub struct StrikeReport {
    pub strike_id: Uuid,
    pub outcome: StrikeOutcome,
    /// The opportunity with strike counters and in-flight observations folded in.
    pub opportunity: Opportunity,
    pub attempts: Vec<AttemptReport>,
    /// Whether this was the half-open circuit's trial strike.
    pub trial: bool,
}

impl StrikeReport {
    /// The error that best explains a strike that did not win.
    ///
    /// Refused strikes map to [`StrikeError::NoAgentsAvailable`]; exhausted
    /// strikes surface the last attempt error.
    pub fn error(&self) -> Option<StrikeError> {
        match &self.outcome {
            StrikeOutcome::Won { .. } | StrikeOutcome::Expired => None,
            StrikeOutcome::NoAgents | StrikeOutcome::CircuitOpen { .. } => {
                Some(StrikeError::NoAgentsAvailable {
                    platform: self.opportunity.source,
                })
            }
            StrikeOutcome::Exhausted => self
                .attempts
                .iter()
                .rev()
                .find_map(|attempt| attempt.error.clone()),
        }
    }
}

/// Runs one coordinated, staggered, parallel claim per opportunity.
///
/// Steps per strike:
/// 1. Drop expired opportunities, consult the source circuit
/// 2. Resolve the strategy for the current mode, rank and lease healthy agents
/// 3. Spawn one task per agent behind a shared go signal
/// 4. Stop the losers on the first win when the strategy asks for it
/// 5. Feed outcomes into registry, cooldowns, timing, circuit and metrics
/// 6. Release the agent lease and the fingerprint
pub struct StrikeCoordinator {
    agents: Arc<dyn AgentProvider>,
    executor: Arc<dyn ClaimExecutor>,
    scheduler: Arc<OpportunityScheduler>,
    circuit_breaker: Arc<CircuitBreakerService>,
    timing: Option<TimingHandle>,
    metrics: Option<MetricsHandle>,
    selector: QuantumSelector,
    strategies: StrategiesConfig,
    blocked_cooldown: Duration,
    expiry_ceiling: Duration,
    mode: watch::Receiver<OperatingMode>,
    shutdown: CancellationToken,
}

enum AttemptResult {
    Claimed,
    Missed(Option<StrikeError>),
    TimedOut(Duration),
    Cancelled,
}

impl StrikeCoordinator {
    pub fn new(
        config: &Config,
        agents: Arc<dyn AgentProvider>,
        executor: Arc<dyn ClaimExecutor>,
        scheduler: Arc<OpportunityScheduler>,
        circuit_breaker: Arc<CircuitBreakerService>,
        mode: watch::Receiver<OperatingMode>,
    ) -> Self {
        Self {
            agents,
            executor,
            scheduler,
            circuit_breaker,
            timing: None,
            metrics: None,
            selector: QuantumSelector::new(config.agents.selection_noise),
            strategies: config.strategies.clone(),
            blocked_cooldown: config.agents.blocked_cooldown(),
            expiry_ceiling: config.scheduler.expiry_ceiling(),
            mode,
            shutdown: CancellationToken::new(),
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

    /// Strikes run under child tokens of `shutdown`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn current_mode(&self) -> OperatingMode {
        *self.mode.borrow()
    }

    /// Strike `opportunity` once. Always releases its fingerprint.
    #[instrument(
        skip(self, opportunity),
        fields(fingerprint = %opportunity.fingerprint.short(), source = %opportunity.source)
    )]
    pub async fn execute(&self, mut opportunity: Opportunity) -> StrikeReport {
        let strike_id = Uuid::new_v4();
        let (outcome, attempts, trial) = self.run_strike(strike_id, &mut opportunity).await;

        if let Some(reobserved) = self.scheduler.release(&opportunity.fingerprint).await {
            opportunity.attempt_count += reobserved.count;
            opportunity.confidence_score = reobserved.confidence;
            opportunity.price = reobserved.price;
        }

        StrikeReport {
            strike_id,
            outcome,
            opportunity,
            attempts,
            trial,
        }
    }

    async fn run_strike(
        &self,
        strike_id: Uuid,
        opportunity: &mut Opportunity,
    ) -> (StrikeOutcome, Vec<AttemptReport>, bool) {
        let source = opportunity.source;
        let now = Utc::now();

        if opportunity.is_expired(self.expiry_ceiling, now) {
            info!("Opportunity expired before strike");
            self.emit(MetricsEvent::Expired { source });
            return (StrikeOutcome::Expired, Vec::new(), false);
        }

        let trial = match self.circuit_breaker.check(source).await {
            CircuitCheckResult::Blocked { retry_after, .. } => {
                debug!(%retry_after, "Circuit open, strike refused");
                self.emit(MetricsEvent::CircuitRejected { source });
                return (StrikeOutcome::CircuitOpen { retry_after }, Vec::new(), false);
            }
            CircuitCheckResult::Testing { .. } => true,
            CircuitCheckResult::Allowed => false,
        };

        let mode = self.current_mode();
        let strategy = Strategy::from_config(mode, self.strategies.for_mode(mode));

        let mut candidates = match self
            .agents
            .healthy_agents(source, strategy.min_quality_tier)
            .await
        {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "Agent provider failed, treating as no agents");
                Vec::new()
            }
        };
        candidates.retain(|agent| !agent.is_cooling_down(now));

        let wanted = if trial { 1 } else { strategy.max_parallel_agents };
        let ranked = self.selector.rank(candidates, source);
        let lease = self.lease(&ranked, wanted).await;
        let selected: Vec<(Agent, f64)> = ranked
            .into_iter()
            .filter(|(agent, _)| lease.contains(&agent.agent_id))
            .collect();

        if selected.is_empty() {
            info!(mode = %mode, min_tier = %strategy.min_quality_tier, "No agents available");
            if trial {
                self.circuit_breaker.record_inconclusive(source).await;
            }
            self.emit(MetricsEvent::NoAgents { source });
            return (StrikeOutcome::NoAgents, Vec::new(), trial);
        }

        for (agent, score) in &selected {
            opportunity
                .per_agent_scores
                .insert(agent.agent_id.clone(), *score);
        }

        let agents: Vec<Agent> = selected.into_iter().map(|(agent, _)| agent).collect();
        info!(
            %strike_id,
            mode = %mode,
            agents = agents.len(),
            trial,
            "Launching strike"
        );

        let (attempts, winner) = self
            .launch(strike_id, opportunity, &strategy, agents)
            .await;

        self.record_outcomes(opportunity, &strategy, &attempts, trial).await;
        lease.release().await;

        opportunity.strikes += 1;
        let outcome = match winner {
            Some((agent_id, elapsed)) => {
                info!(%strike_id, agent_id = %agent_id, elapsed_ms = elapsed.as_millis() as u64, "Strike won");
                StrikeOutcome::Won { agent_id, elapsed }
            }
            None => {
                opportunity.attempt_count += 1;
                info!(%strike_id, strikes = opportunity.strikes, "Strike exhausted");
                StrikeOutcome::Exhausted
            }
        };

        (outcome, attempts, trial)
    }

    /// Lease up to `wanted` of the ranked agents, best first.
    async fn lease(&self, ranked: &[(Agent, f64)], wanted: usize) -> AgentLease {
        let ids: Vec<String> = ranked
            .iter()
            .map(|(agent, _)| agent.agent_id.clone())
            .collect();
        let granted = match self.agents.reserve(&ids, wanted).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!(error = %e, "Agent lease failed, treating as no agents");
                Vec::new()
            }
        };
        if granted.len() < wanted.min(ids.len()) {
            debug!(
                wanted,
                granted = granted.len(),
                "Some agents were taken by concurrent strikes"
            );
        }
        AgentLease {
            provider: Arc::clone(&self.agents),
            agent_ids: granted,
            released: false,
        }
    }

    /// Spawn the attempt tasks, release them together and collect reports.
    async fn launch(
        &self,
        strike_id: Uuid,
        opportunity: &Opportunity,
        strategy: &Strategy,
        agents: Vec<Agent>,
    ) -> (Vec<AttemptReport>, Option<(String, Duration)>) {
        let count = agents.len();
        let timing_scale = self
            .timing
            .as_ref()
            .map_or(1.0, |timing| timing.snapshot().delay_scale);
        let strike_token = self.shutdown.child_token();
        let (go_tx, go_rx) = watch::channel(false);
        let shared = Arc::new(opportunity.clone());
        let mut roster: Vec<(usize, String)> = Vec::with_capacity(count);

        let mut set = JoinSet::new();
        for (index, agent) in agents.into_iter().enumerate() {
            roster.push((index, agent.agent_id.clone()));
            let action_delay = match &self.timing {
                Some(timing) => timing.action_delay().await,
                None => Duration::ZERO,
            };
            let ctx = AttemptContext {
                strike_id,
                index,
                cancel: strike_token.child_token(),
                timeout: strategy.strike_timeout,
                action_delay,
            };
            let delay = strategy.delay(index, count, opportunity.priority, timing_scale);
            set.spawn(run_attempt(
                Arc::clone(&self.executor),
                ctx,
                Arc::clone(&shared),
                agent,
                go_rx.clone(),
                delay,
            ));
        }

        let go_at = Instant::now();
        let _ = go_tx.send(true);

        let mut reports = Vec::with_capacity(count);
        let mut winner: Option<(String, Duration)> = None;
        let mut terminated_early = false;

        while let Some(joined) = set.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "Attempt task failed to join");
                    continue;
                }
            };

            let won = report.kind == AttemptKind::Success && winner.is_none();
            if won {
                winner = Some((report.agent_id.clone(), go_at.elapsed()));
            }
            reports.push(report);

            if won && strategy.early_termination_on_success {
                strike_token.cancel();
                terminated_early = true;
                break;
            }
        }

        if terminated_early {
            let grace = strategy.strike_timeout / 10;
            let deadline = tokio::time::sleep(grace);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    joined = set.join_next() => match joined {
                        Some(Ok(report)) => reports.push(report),
                        Some(Err(e)) => warn!(error = %e, "Attempt task failed to join"),
                        None => break,
                    },
                    () = &mut deadline => {
                        warn!(
                            remaining = set.len(),
                            grace_ms = grace.as_millis() as u64,
                            "Attempts ignored cancellation, aborting"
                        );
                        set.abort_all();
                        while set.join_next().await.is_some() {}
                        break;
                    }
                }
            }
        }

        // Aborted or panicked tasks still count as cancelled attempts
        let reported: HashSet<usize> = reports.iter().map(|r| r.index).collect();
        for (index, agent_id) in roster {
            if !reported.contains(&index) {
                reports.push(AttemptReport {
                    agent_id,
                    index,
                    kind: AttemptKind::Cancelled,
                    error: None,
                    elapsed: go_at.elapsed(),
                });
            }
        }
        reports.sort_by_key(|r| r.index);

        (reports, winner)
    }

    async fn record_outcomes(
        &self,
        opportunity: &Opportunity,
        strategy: &Strategy,
        attempts: &[AttemptReport],
        trial: bool,
    ) {
        let source = opportunity.source;
        let now = Utc::now();

        for attempt in attempts {
            let cooldown = match attempt.kind {
                AttemptKind::Blocked => self.blocked_cooldown,
                AttemptKind::Success | AttemptKind::Cancelled => strategy.cooldown(true),
                AttemptKind::Failure | AttemptKind::Timeout => strategy.cooldown(false),
            };

            if attempt.kind != AttemptKind::Cancelled {
                let success = attempt.kind == AttemptKind::Success;
                if let Err(e) = self
                    .agents
                    .record_feedback(&attempt.agent_id, source, success)
                    .await
                {
                    warn!(agent_id = %attempt.agent_id, error = %e, "Failed to record agent feedback");
                }
                if let Some(timing) = &self.timing {
                    timing.record_outcome(
                        success,
                        attempt.kind == AttemptKind::Blocked,
                        attempt.elapsed,
                    );
                }
            }

            let until = cooldown_until(now, cooldown);
            if let Err(e) = self.agents.apply_cooldown(&attempt.agent_id, until).await {
                warn!(agent_id = %attempt.agent_id, error = %e, "Failed to apply cooldown");
            }

            if let Some(error) = &attempt.error {
                debug!(
                    agent_id = %attempt.agent_id,
                    kind = ?error.kind(),
                    error = %error,
                    "Attempt failed"
                );
            }
        }

        let won = attempts.iter().any(|a| a.kind == AttemptKind::Success);
        let blocked: Vec<&AttemptReport> = attempts
            .iter()
            .filter(|a| a.kind == AttemptKind::Blocked)
            .collect();

        // Only the trial strike may move a half-open circuit
        if won {
            if trial {
                self.circuit_breaker.record_trial_success(source).await;
            } else {
                self.circuit_breaker.record_success(source).await;
            }
        } else if !blocked.is_empty() {
            for attempt in blocked {
                let reason = attempt
                    .error
                    .as_ref()
                    .map_or_else(|| "blocked".to_string(), ToString::to_string);
                if trial {
                    self.circuit_breaker.record_trial_failure(source, reason).await;
                } else {
                    self.circuit_breaker.record_failure(source, reason).await;
                }
            }
        } else if trial {
            self.circuit_breaker.record_inconclusive(source).await;
        }

        let winner = attempts
            .iter()
            .find(|a| a.kind == AttemptKind::Success)
            .map(|a| a.agent_id.clone());
        let elapsed = attempts
            .iter()
            .filter(|a| a.kind == AttemptKind::Success)
            .map(|a| a.elapsed)
            .min()
            .or_else(|| attempts.iter().map(|a| a.elapsed).max())
            .unwrap_or_default();

        self.emit(MetricsEvent::StrikeCompleted(StrikeRecord {
            source,
            winner,
            elapsed,
            attempts: attempts.iter().map(|a| a.kind).collect(),
        }));
    }

    fn emit(&self, event: MetricsEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.record(event);
        }
    }
}

/// `now + cooldown`, capped so oversized values never wrap or vanish.
fn cooldown_until(now: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    let capped = cooldown.min(Duration::from_secs(MAX_COOLDOWN_SECS));
    chrono::Duration::from_std(capped)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Agents leased to one strike.
///
/// A lease dropped before [`AgentLease::release`] (an aborted strike) hands
/// its agents back from a spawned task.
struct AgentLease {
    provider: Arc<dyn AgentProvider>,
    agent_ids: Vec<String>,
    released: bool,
}

impl AgentLease {
    fn contains(&self, agent_id: &str) -> bool {
        self.agent_ids.iter().any(|id| id == agent_id)
    }

    async fn release(mut self) {
        if let Err(e) = self.provider.release(&self.agent_ids).await {
            warn!(error = %e, agents = self.agent_ids.len(), "Failed to release agent lease");
        }
        self.released = true;
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        if self.released || self.agent_ids.is_empty() {
            return;
        }
        let provider = Arc::clone(&self.provider);
        let agent_ids = std::mem::take(&mut self.agent_ids);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provider.release(&agent_ids).await {
                        warn!(error = %e, "Failed to release abandoned agent lease");
                    }
                });
            }
            Err(_) => warn!(agents = ?agent_ids, "Agent lease dropped outside the runtime"),
        }
    }
}

/// One agent's attempt: wait for go, stagger, then claim under the timeout.
async fn run_attempt(
    executor: Arc<dyn ClaimExecutor>,
    ctx: AttemptContext,
    opportunity: Arc<Opportunity>,
    agent: Agent,
    mut go: watch::Receiver<bool>,
    delay: Duration,
) -> AttemptReport {
    let index = ctx.index;
    let cancel = ctx.cancel.clone();
    let timeout = ctx.timeout;

    let released = tokio::select! {
        () = cancel.cancelled() => false,
        go = go.wait_for(|go| *go) => go.is_ok(),
    };
    let started = Instant::now();

    let staggered = released
        && tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        };

    // Once running, the executor observes `ctx.cancel` itself
    let result = if staggered {
        match tokio::time::timeout(timeout, executor.attempt(ctx, &opportunity, &agent)).await {
            Ok(Ok(true)) => AttemptResult::Claimed,
            Ok(Ok(false)) => AttemptResult::Missed(None),
            Ok(Err(e)) => AttemptResult::Missed(Some(e)),
            Err(_) => AttemptResult::TimedOut(timeout),
        }
    } else {
        AttemptResult::Cancelled
    };

    let (kind, error) = match result {
        AttemptResult::Claimed => (AttemptKind::Success, None),
        AttemptResult::Missed(Some(e)) if e.trips_circuit() => (AttemptKind::Blocked, Some(e)),
        AttemptResult::Missed(_) if cancel.is_cancelled() => (AttemptKind::Cancelled, None),
        AttemptResult::Missed(e) => (AttemptKind::Failure, e),
        AttemptResult::TimedOut(after) => (AttemptKind::Timeout, Some(StrikeError::Timeout { after })),
        AttemptResult::Cancelled => (AttemptKind::Cancelled, None),
    };

    AttemptReport {
        agent_id: agent.agent_id,
        index,
        kind,
        error,
        elapsed: started.elapsed(),
    }
}
