//! Per-source circuit breaker.
//!
//! Repeated `Blocked` outcomes on a platform open its circuit and suspend
//! scheduling for that platform. After the recovery timeout a single trial
//! strike is admitted; success closes the circuit, another block reopens it
//! with a doubled (capped) timeout.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::domain::models::{CircuitBreakerSettings, Platform, MAX_COOLDOWN_SECS};

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive blocked outcomes before opening the circuit.
    pub failure_threshold: u32,
    /// Base duration to keep the circuit open before a trial.
    pub recovery_timeout: Duration,
    /// Upper bound for the doubled recovery timeout.
    pub max_recovery_timeout: Duration,
    /// Whether to enable circuit breakers.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: secs(settings.recovery_timeout_secs),
            max_recovery_timeout: secs(settings.max_recovery_timeout_secs),
            enabled: settings.enabled,
        }
    }
}

/// Seconds as a chrono duration, saturating at `MAX_COOLDOWN_SECS`.
fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value.min(MAX_COOLDOWN_SECS)).unwrap_or(i64::MAX))
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, strikes flow normally.
    Closed,
    /// Circuit is open, strikes are suspended.
    Open,
    /// Recovery timeout elapsed; one trial strike decides.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Individual circuit breaker state for one platform.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub source: Platform,
    pub state: CircuitState,
    /// Blocked outcomes since the last success.
    pub consecutive_failures: u32,
    pub last_failure: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    /// Recovery timeout currently in force; doubles on failed trials.
    pub current_recovery: Duration,
    /// Whether the single half-open trial slot is taken.
    pub trial_in_progress: bool,
    pub state_changed_at: DateTime<Utc>,
    /// Total times circuit opened.
    pub open_count: u32,
}

impl CircuitBreaker {
    pub fn new(source: Platform, config: &CircuitBreakerConfig) -> Self {
        Self {
            source,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
            current_recovery: config.recovery_timeout,
            trial_in_progress: false,
            state_changed_at: Utc::now(),
            open_count: 0,
        }
    }

    /// Record a blocked outcome. Returns `true` when this call tripped the circuit.
    ///
    /// While half-open only the trial strike's own block reopens the circuit.
    pub fn record_failure(
        &mut self,
        reason: impl Into<String>,
        trial: bool,
        now: DateTime<Utc>,
        config: &CircuitBreakerConfig,
    ) -> bool {
        self.consecutive_failures += 1;
        self.last_failure = Some(reason.into());

        match self.state {
            CircuitState::Closed if self.consecutive_failures >= config.failure_threshold => {
                self.open(now);
                true
            }
            CircuitState::HalfOpen if trial => {
                // Failed trial: back off harder
                let doubled = self.current_recovery + self.current_recovery;
                self.current_recovery = doubled.min(config.max_recovery_timeout);
                self.open(now);
                true
            }
            _ => false,
        }
    }

    /// Record a successful strike. Returns `true` when this call closed the circuit.
    ///
    /// Only the trial strike closes a half-open circuit; late successes from
    /// strikes admitted before the circuit opened change nothing.
    pub fn record_success(
        &mut self,
        trial: bool,
        now: DateTime<Utc>,
        config: &CircuitBreakerConfig,
    ) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                false
            }
            CircuitState::HalfOpen if trial => {
                self.close(now, config);
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => false,
        }
    }

    /// A strike that neither won nor got blocked; frees a held trial slot.
    pub fn record_inconclusive(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_progress = false;
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.state_changed_at = now;
        self.trial_in_progress = false;
        self.open_count += 1;
    }

    fn close(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.state_changed_at = now;
        self.trial_in_progress = false;
        self.consecutive_failures = 0;
        self.current_recovery = config.recovery_timeout;
    }

    fn half_open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::HalfOpen;
        self.state_changed_at = now;
        self.trial_in_progress = false;
    }

    /// When the open circuit admits its trial.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.opened_at.map(|at| at + self.current_recovery)
    }

    /// Whether a strike would currently be refused, without claiming anything.
    pub fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed => false,
            CircuitState::Open => self.retry_after().map_or(true, |retry| now < retry),
            CircuitState::HalfOpen => self.trial_in_progress,
        }
    }

    /// Admission decision for one strike; claims the trial slot when half-open.
    pub fn admit(&mut self, now: DateTime<Utc>) -> CircuitCheckResult {
        if self.state == CircuitState::Open && !self.is_blocking(now) {
            self.half_open(now);
        }

        match self.state {
            CircuitState::Closed => CircuitCheckResult::Allowed,
            CircuitState::HalfOpen if !self.trial_in_progress => {
                self.trial_in_progress = true;
                CircuitCheckResult::Testing {
                    source: self.source,
                }
            }
            _ => {
                let opened_at = self.opened_at.unwrap_or(now);
                CircuitCheckResult::Blocked {
                    source: self.source,
                    opened_at,
                    retry_after: self.retry_after().unwrap_or(now),
                }
            }
        }
    }

    /// Manually reset the circuit.
    pub fn reset(&mut self, config: &CircuitBreakerConfig) {
        self.close(Utc::now(), config);
        self.last_failure = None;
        self.open_count = 0;
    }
}

/// Result of a circuit breaker check.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitCheckResult {
    /// Strike is allowed.
    Allowed,
    /// Strike is refused by an open circuit.
    Blocked {
        source: Platform,
        opened_at: DateTime<Utc>,
        retry_after: DateTime<Utc>,
    },
    /// Circuit is half-open; this strike is the single trial.
    Testing { source: Platform },
}

impl CircuitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Testing { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn is_trial(&self) -> bool {
        matches!(self, Self::Testing { .. })
    }
}

/// Event emitted when a circuit breaker trips.
#[derive(Debug, Clone)]
pub struct CircuitTrippedEvent {
    pub source: Platform,
    pub tripped_at: DateTime<Utc>,
    /// How many times this circuit has opened.
    pub open_count: u32,
    /// Recovery timeout in force for this opening.
    pub recovery_timeout: Duration,
    pub last_failure: Option<String>,
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub source: Platform,
    pub state: String,
    pub consecutive_failures: u32,
    pub open_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

/// Service for managing circuit breakers.
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<Platform, CircuitBreaker>>>,
    event_sender: Option<mpsc::Sender<CircuitTrippedEvent>>,
}

impl CircuitBreakerService {
    /// Create a new circuit breaker service.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
            event_sender: None,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Set the event sender for circuit tripped events.
    pub fn with_event_sender(mut self, sender: mpsc::Sender<CircuitTrippedEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Admission check for a strike against `source`.
    pub async fn check(&self, source: Platform) -> CircuitCheckResult {
        if !self.config.enabled {
            return CircuitCheckResult::Allowed;
        }

        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(source)
            .or_insert_with(|| CircuitBreaker::new(source, &self.config));
        let result = circuit.admit(Utc::now());

        if result.is_trial() {
            info!(source = %source, "Circuit half-open, admitting trial strike");
        }
        result
    }

    /// Whether `source` would currently be refused. Does not claim a trial.
    pub async fn is_blocked(&self, source: Platform) -> bool {
        if !self.config.enabled {
            return false;
        }
        let circuits = self.circuits.read().await;
        circuits
            .get(&source)
            .is_some_and(|c| c.is_blocking(Utc::now()))
    }

    /// Sources currently refusing strikes.
    pub async fn blocked_sources(&self) -> Vec<Platform> {
        if !self.config.enabled {
            return Vec::new();
        }
        let now = Utc::now();
        let circuits = self.circuits.read().await;
        circuits
            .iter()
            .filter(|(_, c)| c.is_blocking(now))
            .map(|(source, _)| *source)
            .collect()
    }

    /// Record a blocked outcome for the given source.
    pub async fn record_failure(&self, source: Platform, reason: impl Into<String>) {
        self.fail(source, reason.into(), false).await;
    }

    /// Record the half-open trial strike being blocked.
    pub async fn record_trial_failure(&self, source: Platform, reason: impl Into<String>) {
        self.fail(source, reason.into(), true).await;
    }

    /// Record a success for the given source.
    pub async fn record_success(&self, source: Platform) {
        self.succeed(source, false).await;
    }

    /// Record the half-open trial strike winning.
    pub async fn record_trial_success(&self, source: Platform) {
        self.succeed(source, true).await;
    }

    async fn fail(&self, source: Platform, reason: String, trial: bool) {
        if !self.config.enabled {
            return;
        }

        let now = Utc::now();
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(source)
            .or_insert_with(|| CircuitBreaker::new(source, &self.config));

        if circuit.record_failure(reason, trial, now, &self.config) {
            warn!(
                source = %source,
                open_count = circuit.open_count,
                recovery_secs = circuit.current_recovery.num_seconds(),
                trial,
                "Circuit opened, suspending strikes for source"
            );

            if let Some(ref sender) = self.event_sender {
                let event = CircuitTrippedEvent {
                    source,
                    tripped_at: now,
                    open_count: circuit.open_count,
                    recovery_timeout: circuit.current_recovery,
                    last_failure: circuit.last_failure.clone(),
                };
                let _ = sender.try_send(event);
            }
        }
    }

    async fn succeed(&self, source: Platform, trial: bool) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(&source) {
            if circuit.record_success(trial, Utc::now(), &self.config) {
                info!(source = %source, "Trial strike succeeded, circuit closed");
            }
        }
    }

    /// Record a strike that neither succeeded nor was blocked.
    pub async fn record_inconclusive(&self, source: Platform) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(&source) {
            circuit.record_inconclusive();
        }
    }

    /// Get the state of a circuit.
    pub async fn get_state(&self, source: Platform) -> Option<CircuitState> {
        let circuits = self.circuits.read().await;
        circuits.get(&source).map(|c| c.state)
    }

    /// Get statistics for all circuits.
    pub async fn stats(&self) -> Vec<CircuitStats> {
        let circuits = self.circuits.read().await;
        let mut stats: Vec<CircuitStats> = circuits
            .values()
            .map(|c| CircuitStats {
                source: c.source,
                state: c.state.as_str().to_string(),
                consecutive_failures: c.consecutive_failures,
                open_count: c.open_count,
                opened_at: c.opened_at,
                retry_after: c.retry_after(),
                state_changed_at: c.state_changed_at,
            })
            .collect();
        stats.sort_by_key(|s| s.source);
        stats
    }

    /// Get open circuits.
    pub async fn get_open_circuits(&self) -> Vec<Platform> {
        let circuits = self.circuits.read().await;
        circuits
            .iter()
            .filter(|(_, c)| c.state == CircuitState::Open)
            .map(|(s, _)| *s)
            .collect()
    }

    /// Manually reset a circuit.
    pub async fn reset(&self, source: Platform) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(&source) {
            circuit.reset(&self.config);
        }
    }

    /// Reset all circuits.
    pub async fn reset_all(&self) {
        let mut circuits = self.circuits.write().await;
        for circuit in circuits.values_mut() {
            circuit.reset(&self.config);
        }
    }

    /// Get configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::seconds(300),
            max_recovery_timeout: Duration::seconds(3600),
            enabled: true,
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.recovery_timeout, Duration::seconds(300));
        assert_eq!(config.max_recovery_timeout, Duration::seconds(3600));
        assert!(config.enabled);
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let config = config(3);
        let now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Fansale, &config);

        assert!(!circuit.record_failure("blocked 1", false, now, &config));
        assert!(!circuit.record_failure("blocked 2", false, now, &config));
        assert_eq!(circuit.state, CircuitState::Closed);

        assert!(circuit.record_failure("blocked 3", false, now, &config));
        assert_eq!(circuit.state, CircuitState::Open);
        assert_eq!(circuit.open_count, 1);
        assert!(circuit.is_blocking(now));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let config = config(3);
        let now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Fansale, &config);

        circuit.record_failure("blocked", false, now, &config);
        circuit.record_failure("blocked", false, now, &config);
        circuit.record_success(false, now, &config);
        circuit.record_failure("blocked", false, now, &config);
        circuit.record_failure("blocked", false, now, &config);

        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures, 2);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let config = config(1);
        let opened = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Eventim, &config);
        circuit.record_failure("blocked", false, opened, &config);

        assert!(circuit.admit(opened + Duration::seconds(10)).is_blocked());

        let later = opened + Duration::seconds(301);
        assert!(!circuit.is_blocking(later));
        assert!(circuit.admit(later).is_trial());
        assert_eq!(circuit.state, CircuitState::HalfOpen);
        assert!(circuit.admit(later).is_blocked());
        assert!(circuit.is_blocking(later));
    }

    #[test]
    fn test_failed_trial_doubles_recovery_with_cap() {
        let config = CircuitBreakerConfig {
            max_recovery_timeout: Duration::seconds(1000),
            ..config(1)
        };
        let mut now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Vivaticket, &config);
        circuit.record_failure("blocked", false, now, &config);

        for expected in [600, 1000, 1000] {
            now += circuit.current_recovery + Duration::seconds(1);
            assert!(circuit.admit(now).is_trial());
            assert!(circuit.record_failure("still blocked", true, now, &config));
            assert_eq!(circuit.current_recovery, Duration::seconds(expected));
        }
        assert_eq!(circuit.open_count, 4);
    }

    #[test]
    fn test_trial_success_closes_and_restores_timeout() {
        let config = config(1);
        let mut now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Ticketmaster, &config);
        circuit.record_failure("blocked", false, now, &config);
        now += Duration::seconds(301);
        circuit.admit(now);
        circuit.record_failure("blocked", true, now, &config);
        now += Duration::seconds(601);
        assert!(circuit.admit(now).is_trial());

        assert!(circuit.record_success(true, now, &config));
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.current_recovery, Duration::seconds(300));
        assert!(circuit.admit(now).is_allowed());
    }

    #[test]
    fn test_late_success_leaves_open_circuit_open() {
        let config = config(3);
        let now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Fansale, &config);
        assert!(circuit.admit(now).is_allowed());

        for _ in 0..3 {
            circuit.record_failure("blocked", false, now, &config);
        }
        assert_eq!(circuit.state, CircuitState::Open);

        // A strike admitted while closed wins after the circuit opened
        assert!(!circuit.record_success(false, now, &config));
        assert_eq!(circuit.state, CircuitState::Open);
        assert!(circuit.is_blocking(now));
    }

    #[test]
    fn test_only_the_trial_decides_half_open() {
        let config = config(1);
        let mut now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Eventim, &config);
        circuit.record_failure("blocked", false, now, &config);
        now += Duration::seconds(301);
        assert!(circuit.admit(now).is_trial());

        // Stragglers from before the trial neither reopen nor close it
        assert!(!circuit.record_failure("straggler blocked", false, now, &config));
        assert!(!circuit.record_success(false, now, &config));
        assert_eq!(circuit.state, CircuitState::HalfOpen);
        assert_eq!(circuit.current_recovery, Duration::seconds(300));
        assert_eq!(circuit.open_count, 1);

        assert!(circuit.record_success(true, now, &config));
        assert_eq!(circuit.state, CircuitState::Closed);
    }

    #[test]
    fn test_oversized_recovery_is_capped() {
        let config = CircuitBreakerConfig::from(&CircuitBreakerSettings {
            recovery_timeout_secs: u64::MAX,
            max_recovery_timeout_secs: u64::MAX,
            ..CircuitBreakerSettings::default()
        });
        assert_eq!(config.recovery_timeout, Duration::seconds(MAX_COOLDOWN_SECS as i64));
        assert_eq!(config.max_recovery_timeout, config.recovery_timeout);
    }

    #[test]
    fn test_inconclusive_trial_frees_slot() {
        let config = config(1);
        let mut now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Ticketmaster, &config);
        circuit.record_failure("blocked", false, now, &config);
        now += Duration::seconds(301);

        assert!(circuit.admit(now).is_trial());
        circuit.record_inconclusive();
        assert_eq!(circuit.state, CircuitState::HalfOpen);
        assert!(circuit.admit(now).is_trial());
    }

    #[test]
    fn test_circuit_reset() {
        let config = config(2);
        let now = Utc::now();
        let mut circuit = CircuitBreaker::new(Platform::Fansale, &config);
        circuit.record_failure("blocked", false, now, &config);
        circuit.record_failure("blocked", false, now, &config);
        assert_eq!(circuit.state, CircuitState::Open);

        circuit.reset(&config);
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.open_count, 0);
        assert_eq!(circuit.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_service() {
        let service = CircuitBreakerService::new(config(3));
        let source = Platform::Fansale;

        assert!(service.check(source).await.is_allowed());

        service.record_failure(source, "blocked 1").await;
        service.record_failure(source, "blocked 2").await;
        assert!(service.check(source).await.is_allowed());
        assert!(!service.is_blocked(source).await);

        service.record_failure(source, "blocked 3").await;
        assert!(service.check(source).await.is_blocked());
        assert!(service.is_blocked(source).await);
        assert_eq!(service.blocked_sources().await, vec![source]);
        assert_eq!(service.get_open_circuits().await, vec![source]);

        // Other sources are unaffected
        assert!(service.check(Platform::Eventim).await.is_allowed());
    }

    #[tokio::test]
    async fn test_circuit_breaker_stats_and_reset() {
        let service = CircuitBreakerService::new(config(1));
        service.record_failure(Platform::Fansale, "blocked").await;
        service.record_failure(Platform::Eventim, "blocked").await;

        let stats = service.stats().await;
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.state == "open"));

        service.reset(Platform::Fansale).await;
        assert_eq!(service.get_state(Platform::Fansale).await, Some(CircuitState::Closed));
        assert_eq!(service.get_state(Platform::Eventim).await, Some(CircuitState::Open));

        service.reset_all().await;
        assert!(service.get_open_circuits().await.is_empty());
    }

    #[tokio::test]
    async fn test_circuit_breaker_disabled() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            enabled: false,
            ..config(1)
        });

        for _ in 0..10 {
            service.record_failure(Platform::Fansale, "blocked").await;
        }

        assert!(service.check(Platform::Fansale).await.is_allowed());
        assert!(service.blocked_sources().await.is_empty());
    }

    #[tokio::test]
    async fn test_circuit_breaker_event_emission() {
        let (tx, mut rx) = mpsc::channel(10);
        let service = CircuitBreakerService::new(config(2)).with_event_sender(tx);

        service.record_failure(Platform::Vivaticket, "blocked 1").await;
        assert!(rx.try_recv().is_err());

        service.record_failure(Platform::Vivaticket, "blocked 2").await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.source, Platform::Vivaticket);
        assert_eq!(event.open_count, 1);
        assert_eq!(event.last_failure.as_deref(), Some("blocked 2"));
    }
}
