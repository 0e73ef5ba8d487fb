use crate::domain::models::{Fingerprint, OperatingMode, Opportunity, SchedulerConfig};
use crate::services::circuit_breaker::CircuitBreakerService;
use crate::services::metrics::{MetricsEvent, MetricsHandle};
use crate::services::scoring::OpportunityScorer;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Result of handing an observation to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// New fingerprint, now queued.
    Queued,
    /// Folded into the queued entry with the same fingerprint.
    Merged { attempt_count: u32 },
    /// A strike for this fingerprint is running; the observation is kept
    /// for the coordinator to pick up on release.
    MergedInFlight { observations: u32 },
    /// Older than the expiry ceiling; dropped.
    Expired,
}

/// Observations of an in-flight fingerprint collected while it was striking.
#[derive(Debug, Clone, PartialEq)]
pub struct Reobservation {
    pub count: u32,
    pub confidence: f64,
    pub price: f64,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub deferred: usize,
    pub in_flight: usize,
    pub submitted_total: u64,
    pub merged_total: u64,
    pub expired_total: u64,
}

struct QueuedEntry {
    opportunity: Opportunity,
    not_before: Option<Instant>,
}

impl QueuedEntry {
    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

#[derive(Default)]
struct QueueState {
    queued: HashMap<Fingerprint, QueuedEntry>,
    in_flight: HashMap<Fingerprint, Option<Reobservation>>,
    submitted_total: u64,
    merged_total: u64,
    expired_total: u64,
}

/// Priority processor: deduplicates, ranks and dispatches opportunities.
///
/// Every fingerprint lives in exactly one of two places: the queue or the
/// in-flight set. `next()` moves an entry from the first to the second
/// under a single lock, so two strikes can never hold the same fingerprint.
/// Scores are recomputed at dequeue time so aging is always reflected.
///
/// # Examples
///
/// ```no_run
/// use ticketstrike::domain::models::{OperatingMode, Opportunity, Platform, SchedulerConfig};
/// use ticketstrike::services::OpportunityScheduler;
/// use tokio::sync::watch;
///
/// # async fn example() {
/// let (_mode_tx, mode_rx) = watch::channel(OperatingMode::Hybrid);
/// let scheduler = OpportunityScheduler::new(&SchedulerConfig::default(), mode_rx);
///
/// scheduler
///     .submit(Opportunity::new(Platform::Fansale, "Vasco Live", "Parterre", 89.0, 2))
///     .await;
/// let next = scheduler.next().await;
/// scheduler.release(&next.fingerprint).await;
/// # }
/// ```
pub struct OpportunityScheduler {
    scorer: OpportunityScorer,
    expiry_ceiling: Duration,
    recheck_interval: Duration,
    mode: watch::Receiver<OperatingMode>,
    circuit_breaker: Option<Arc<CircuitBreakerService>>,
    metrics: Option<MetricsHandle>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OpportunityScheduler {
    pub fn new(config: &SchedulerConfig, mode: watch::Receiver<OperatingMode>) -> Self {
        Self {
            scorer: OpportunityScorer::new(config.freshness_window()),
            expiry_ceiling: config.expiry_ceiling(),
            recheck_interval: config.recheck_interval(),
            mode,
            circuit_breaker: None,
            metrics: None,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Skip sources whose circuit is open when picking the next entry.
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreakerService>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn scorer(&self) -> &OpportunityScorer {
        &self.scorer
    }

    /// Submit an observation; eligible immediately.
    pub async fn submit(&self, opportunity: Opportunity) -> SubmitOutcome {
        self.insert(opportunity, None).await
    }

    /// Submit an observation that stays invisible to `next()` for `delay`.
    pub async fn submit_after(&self, opportunity: Opportunity, delay: Duration) -> SubmitOutcome {
        self.insert(opportunity, Some(Instant::now() + delay)).await
    }

    #[instrument(
        skip(self, opportunity),
        fields(fingerprint = %opportunity.fingerprint.short(), source = %opportunity.source)
    )]
    async fn insert(&self, opportunity: Opportunity, not_before: Option<Instant>) -> SubmitOutcome {
        let source = opportunity.source;

        if opportunity.is_expired(self.expiry_ceiling, Utc::now()) {
            let mut state = self.state.lock().await;
            state.expired_total += 1;
            self.emit(MetricsEvent::Expired { source });
            debug!("Dropping observation past the expiry ceiling");
            return SubmitOutcome::Expired;
        }

        let fingerprint = opportunity.fingerprint.clone();
        let mut state = self.state.lock().await;
        state.submitted_total += 1;
        self.emit(MetricsEvent::Observed {
            source,
            at: Utc::now(),
        });

        if let Some(pending) = state.in_flight.get_mut(&fingerprint) {
            let reobservation = pending.get_or_insert(Reobservation {
                count: 0,
                confidence: opportunity.confidence_score,
                price: opportunity.price,
            });
            reobservation.count += 1;
            reobservation.confidence = opportunity.confidence_score;
            reobservation.price = opportunity.price;
            let observations = reobservation.count;

            state.merged_total += 1;
            self.emit(MetricsEvent::Merged { source });
            debug!(observations, "Observation merged into in-flight strike");
            return SubmitOutcome::MergedInFlight { observations };
        }

        if let Some(entry) = state.queued.get_mut(&fingerprint) {
            let existing = &mut entry.opportunity;
            existing.merge_observation(opportunity.confidence_score, opportunity.price);
            existing.strikes = existing.strikes.max(opportunity.strikes);
            existing.attempt_count = existing.attempt_count.max(opportunity.attempt_count);
            let attempt_count = existing.attempt_count;

            state.merged_total += 1;
            self.emit(MetricsEvent::Merged { source });
            debug!(attempt_count, "Observation merged into queued entry");
            return SubmitOutcome::Merged { attempt_count };
        }

        debug!(
            priority = %opportunity.priority,
            confidence = opportunity.confidence_score,
            deferred = not_before.is_some(),
            "Opportunity queued"
        );
        state.queued.insert(
            fingerprint,
            QueuedEntry {
                opportunity,
                not_before,
            },
        );
        drop(state);
        self.notify.notify_one();
        SubmitOutcome::Queued
    }

    /// Wait for the highest-scoring eligible opportunity and mark it in flight.
    ///
    /// Cancel-safe: an entry is only removed from the queue in the same
    /// synchronous step that returns it.
    pub async fn next(&self) -> Opportunity {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(opportunity) = self.try_next().await {
                return opportunity;
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep(self.recheck_interval) => {}
            }
        }
    }

    /// Non-blocking `next()`.
    pub async fn try_next(&self) -> Option<Opportunity> {
        let blocked = match &self.circuit_breaker {
            Some(circuit_breaker) => circuit_breaker.blocked_sources().await,
            None => Vec::new(),
        };
        let mode = *self.mode.borrow();
        let now = Utc::now();
        let instant = Instant::now();

        let mut state = self.state.lock().await;
        self.drop_expired(&mut state);

        let best = state
            .queued
            .iter()
            .filter(|(_, entry)| entry.is_ready(instant))
            .filter(|(_, entry)| !blocked.contains(&entry.opportunity.source))
            .map(|(fingerprint, entry)| {
                let score = self.scorer.score(&entry.opportunity, mode, now);
                (fingerprint, score, entry.opportunity.detected_at)
            })
            // Ties go to the older listing
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.2.cmp(&a.2)))
            .map(|(fingerprint, score, _)| (fingerprint.clone(), score))?;

        let (fingerprint, score) = best;
        let entry = state.queued.remove(&fingerprint)?;
        state.in_flight.insert(fingerprint, None);

        info!(
            fingerprint = %entry.opportunity.fingerprint.short(),
            source = %entry.opportunity.source,
            score,
            mode = %mode,
            "Dispatching opportunity"
        );
        Some(entry.opportunity)
    }

    fn drop_expired(&self, state: &mut QueueState) {
        let now = Utc::now();
        let expired: Vec<Fingerprint> = state
            .queued
            .iter()
            .filter(|(_, entry)| entry.opportunity.is_expired(self.expiry_ceiling, now))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in expired {
            if let Some(entry) = state.queued.remove(&fingerprint) {
                state.expired_total += 1;
                self.emit(MetricsEvent::Expired {
                    source: entry.opportunity.source,
                });
                info!(
                    fingerprint = %fingerprint.short(),
                    source = %entry.opportunity.source,
                    "Opportunity expired in queue"
                );
            }
        }
    }

    /// End the strike for `fingerprint`, returning observations that arrived meanwhile.
    pub async fn release(&self, fingerprint: &Fingerprint) -> Option<Reobservation> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(fingerprint).flatten()
    }

    pub async fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.state.lock().await.in_flight.contains_key(fingerprint)
    }

    pub async fn is_queued(&self, fingerprint: &Fingerprint) -> bool {
        self.state.lock().await.queued.contains_key(fingerprint)
    }

    /// Snapshot of a queued entry, mostly for inspection.
    pub async fn peek(&self, fingerprint: &Fingerprint) -> Option<Opportunity> {
        let state = self.state.lock().await;
        state.queued.get(fingerprint).map(|e| e.opportunity.clone())
    }

    pub async fn stats(&self) -> SchedulerStats {
        let instant = Instant::now();
        let state = self.state.lock().await;
        let deferred = state
            .queued
            .values()
            .filter(|entry| !entry.is_ready(instant))
            .count();

        SchedulerStats {
            queued: state.queued.len(),
            deferred,
            in_flight: state.in_flight.len(),
            submitted_total: state.submitted_total,
            merged_total: state.merged_total,
            expired_total: state.expired_total,
        }
    }

    fn emit(&self, event: MetricsEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.record(event);
        }
    }
}
