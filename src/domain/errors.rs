//! Domain errors for the ticketstrike system.

use std::time::Duration;

use thiserror::Error;

use super::models::Platform;

/// Failure taxonomy for claim attempts and strikes.
///
/// Attempt-level errors are captured per agent task and never crash the
/// coordinator. A strike that never dispatched reports
/// [`StrikeError::NoAgentsAvailable`]; the caller backs off and requeues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrikeError {
    /// The source actively rejected the agent.
    #[error("Blocked by source: {reason}")]
    Blocked { reason: String },

    /// The attempt exceeded the strategy's strike timeout.
    #[error("Attempt timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// No agent met the strategy's requirements for this source.
    #[error("No agents available for {platform}")]
    NoAgentsAvailable { platform: Platform },

    /// Network hiccup; retryable with backoff at the monitor level.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The claim reached the source but a competitor won it.
    #[error("Claim rejected: {0}")]
    Rejected(String),
}

/// Coarse classification used for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrikeErrorKind {
    Blocked,
    Timeout,
    NoAgents,
    Transient,
    Rejected,
}

impl StrikeError {
    /// Whether this error counts toward the source's circuit breaker.
    pub const fn trips_circuit(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub const fn kind(&self) -> StrikeErrorKind {
        match self {
            Self::Blocked { .. } => StrikeErrorKind::Blocked,
            Self::Timeout { .. } => StrikeErrorKind::Timeout,
            Self::NoAgentsAvailable { .. } => StrikeErrorKind::NoAgents,
            Self::TransientNetwork(_) => StrikeErrorKind::Transient,
            Self::Rejected(_) => StrikeErrorKind::Rejected,
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }
}

/// Errors a monitor may report while checking its source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Transient monitor error: {0}")]
    Transient(String),

    #[error("Monitor blocked by source: {0}")]
    Blocked(String),

    #[error("Monitor failed: {0}")]
    Fatal(String),
}

/// Domain-level errors raised by collaborators such as agent providers.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
