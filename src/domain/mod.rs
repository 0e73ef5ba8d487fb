//! Domain layer for the ticketstrike opportunity pipeline
//!
//! This module contains the core data model, the failure taxonomy and the
//! port traits implemented by external collaborators.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{DomainError, DomainResult, MonitorError, StrikeError, StrikeErrorKind};
