//! Ticketstrike - opportunity scheduler and strike coordinator
//!
//! Ticketstrike takes perishable ticket listings discovered by independent
//! monitors, deduplicates and ranks them, and races a small group of
//! execution agents at each one with staggered timing, early exit on the
//! first win and cooperative cancellation of the losers. Per-platform
//! circuit breakers, agent cooldowns and an adaptive timing loop keep the
//! pressure on each platform below detection thresholds.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, failure taxonomy and port traits
//! - **Service Layer** (`services`): scoring, scheduling, selection, feedback loops
//! - **Application Layer** (`application`): strike coordinator, monitor loops, orchestrator
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, simulated collaborators
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use ticketstrike::services::{OpportunityScheduler, SubmitOutcome};
//!
//! let outcome = scheduler.submit(opportunity).await;
//! assert_eq!(outcome, SubmitOutcome::Queued);
//! let best = scheduler.next().await;
//! let report = coordinator.execute(best).await;
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{
    MonitorLoop, StrikeCoordinator, StrikeOrchestrator, StrikeOutcome, StrikeReport,
};
pub use domain::errors::{DomainError, MonitorError, StrikeError};
pub use domain::models::{
    Agent, Config, Fingerprint, OperatingMode, Opportunity, Platform, Priority, QualityTier,
};
pub use domain::ports::{AgentProvider, AttemptContext, ClaimExecutor, Monitor};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CircuitBreakerService, InMemoryAgentRegistry, MetricsAggregator, OpportunityScheduler,
    TimingEngine,
};
