//! Common test utilities for integration tests
//!
//! Provides a scripted claim executor, agent and listing fixtures, and a
//! harness that wires the scheduler, circuit breaker, registry and
//! feedback loops the same way the simulate command does.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ticketstrike::domain::errors::StrikeError;
use ticketstrike::domain::models::{
    Agent, Config, OperatingMode, Opportunity, Platform, QualityTier, StaggerPattern,
};
use ticketstrike::domain::ports::{AttemptContext, ClaimExecutor};
use ticketstrike::services::{
    CircuitBreakerConfig, CircuitBreakerService, InMemoryAgentRegistry, MetricsAggregator,
    MetricsHandle, OpportunityScheduler, TimingEngine, TimingHandle,
};
use ticketstrike::{StrikeCoordinator, StrikeOrchestrator};

/// What a scripted agent does once its attempt starts.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Confirm the claim after the delay.
    WinAfter(Duration),
    /// Lose the race after the delay.
    FailAfter(Duration),
    /// Get blocked by the platform after the delay.
    BlockAfter(Duration),
    /// Run until cancelled, then return promptly.
    WaitForCancel,
    /// Ignore cancellation entirely.
    Hang,
}

/// Claim executor whose per-agent behavior is fixed up front.
pub struct ScriptedExecutor {
    behaviors: HashMap<String, Behavior>,
    fallback: Behavior,
    attempts: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(fallback: Behavior) -> Self {
        Self {
            behaviors: HashMap::new(),
            fallback,
            attempts: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, agent_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(agent_id.to_string(), behavior);
        self
    }

    /// Attempts that reached the executor.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Attempts that saw their cancellation token fire and returned.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn wait_or_cancel(&self, ctx: &AttemptContext, delay: Duration) -> bool {
        tokio::select! {
            () = ctx.cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                false
            }
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[async_trait]
impl ClaimExecutor for ScriptedExecutor {
    async fn attempt(
        &self,
        ctx: AttemptContext,
        _opportunity: &Opportunity,
        agent: &Agent,
    ) -> Result<bool, StrikeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .get(&agent.agent_id)
            .copied()
            .unwrap_or(self.fallback);

        match behavior {
            Behavior::WinAfter(delay) => Ok(self.wait_or_cancel(&ctx, delay).await),
            Behavior::FailAfter(delay) => {
                if self.wait_or_cancel(&ctx, delay).await {
                    Err(StrikeError::Rejected("sold to another buyer".to_string()))
                } else {
                    Ok(false)
                }
            }
            Behavior::BlockAfter(delay) => {
                if self.wait_or_cancel(&ctx, delay).await {
                    Err(StrikeError::blocked("captcha wall"))
                } else {
                    Ok(false)
                }
            }
            Behavior::WaitForCancel => {
                ctx.cancel.cancelled().await;
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(false)
            }
        }
    }
}

/// Tier 3 agent with a default identity.
pub fn agent(id: &str) -> Agent {
    Agent::new(id, QualityTier::new(3))
}

/// `agent-1` .. `agent-{count}`.
pub fn agents(count: usize) -> Vec<Agent> {
    (1..=count).map(|i| agent(&format!("agent-{i}"))).collect()
}

pub fn listing(source: Platform, section: &str) -> Opportunity {
    Opportunity::new(source, "Vasco Rossi - San Siro", section, 95.0, 2)
}

/// Default config with selection noise off and hybrid agents launched together.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agents.selection_noise = 0.0;
    let hybrid = config.strategies.for_mode_mut(OperatingMode::Hybrid);
    hybrid.stagger = StaggerPattern::Linear { step_ms: 0 };
    hybrid.min_quality_tier = 1;
    config
}

/// Everything a coordinator needs, wired together.
pub struct Harness {
    pub config: Config,
    pub scheduler: Arc<OpportunityScheduler>,
    pub circuit_breaker: Arc<CircuitBreakerService>,
    pub registry: Arc<InMemoryAgentRegistry>,
    pub executor: Arc<ScriptedExecutor>,
    pub coordinator: Arc<StrikeCoordinator>,
    pub metrics: MetricsHandle,
    pub timing: TimingHandle,
    pub mode_tx: watch::Sender<OperatingMode>,
    pub shutdown: CancellationToken,
    /// Shared by the coordinator and any orchestrator built from this harness
    pub pipeline: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    pub fn new(config: Config, agents: Vec<Agent>, executor: ScriptedExecutor) -> Self {
        let shutdown = CancellationToken::new();
        let (metrics, metrics_task) = MetricsAggregator::spawn(shutdown.child_token());
        let (timing, timing_task) =
            TimingEngine::new(config.timing.clone()).spawn(shutdown.child_token());
        let (mode_tx, mode_rx) = watch::channel(config.mode);
        let pipeline = shutdown.child_token();

        let circuit_breaker = Arc::new(CircuitBreakerService::new(CircuitBreakerConfig::from(
            &config.circuit_breaker,
        )));
        let scheduler = Arc::new(
            OpportunityScheduler::new(&config.scheduler, mode_rx.clone())
                .with_circuit_breaker(Arc::clone(&circuit_breaker))
                .with_metrics(metrics.clone()),
        );
        let registry = Arc::new(InMemoryAgentRegistry::with_agents(agents));
        let executor = Arc::new(executor);

        let coordinator = Arc::new(
            StrikeCoordinator::new(
                &config,
                registry.clone(),
                executor.clone(),
                Arc::clone(&scheduler),
                Arc::clone(&circuit_breaker),
                mode_rx,
            )
            .with_timing(timing.clone())
            .with_metrics(metrics.clone())
            .with_shutdown(pipeline.clone()),
        );

        Self {
            config,
            scheduler,
            circuit_breaker,
            registry,
            executor,
            coordinator,
            metrics,
            timing,
            mode_tx,
            shutdown,
            pipeline,
            tasks: vec![metrics_task, timing_task],
        }
    }

    /// Submit `opportunity` and take it back out as the dispatcher would.
    pub async fn dispatch(&self, opportunity: Opportunity) -> Opportunity {
        self.scheduler.submit(opportunity).await;
        self.scheduler
            .try_next()
            .await
            .expect("submitted opportunity should be dispatchable")
    }

    /// Orchestrator driving this harness. Takes over the mode sender, so
    /// call at most once.
    pub fn orchestrator(&mut self) -> StrikeOrchestrator {
        let (detached, _) = watch::channel(self.config.mode);
        let mode_tx = std::mem::replace(&mut self.mode_tx, detached);
        StrikeOrchestrator::new(
            &self.config.scheduler,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.scheduler),
            mode_tx,
            self.pipeline.clone(),
        )
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for a condition to be true with timeout
///
/// Polls the predicate every 100ms until it returns true or timeout is reached.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    false
}
