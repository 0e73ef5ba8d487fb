//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Simulated collaborators implementing the domain ports

pub mod config;
pub mod logging;
pub mod simulation;
