//! Coordination services: scoring, scheduling, selection and feedback loops.

pub mod adaptive_timing;
pub mod agent_registry;
pub mod agent_selection;
pub mod circuit_breaker;
pub mod metrics;
pub mod scheduler;
pub mod scoring;
pub mod strategy;

pub use adaptive_timing::{TimingEngine, TimingHandle, TimingPattern, TimingSnapshot};
pub use agent_registry::InMemoryAgentRegistry;
pub use agent_selection::QuantumSelector;
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerService, CircuitCheckResult, CircuitState, CircuitStats,
    CircuitTrippedEvent,
};
pub use metrics::{
    AttemptKind, MetricsAggregator, MetricsEvent, MetricsHandle, StrikeMetrics, StrikeRecord,
};
pub use scheduler::{OpportunityScheduler, Reobservation, SchedulerStats, SubmitOutcome};
pub use scoring::OpportunityScorer;
pub use strategy::Strategy;
