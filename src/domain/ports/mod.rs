//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that external collaborators must implement:
//! - ClaimExecutor: performs one claim attempt with one agent (browser automation)
//! - AgentProvider: supplies healthy agents and receives attempt feedback
//! - Monitor: discovers opportunities on one platform
//!
//! These traits keep the scheduling core independent of scraping, browser
//! and profile-storage implementations.

pub mod agent_provider;
pub mod claim_executor;
pub mod monitor;

pub use agent_provider::AgentProvider;
pub use claim_executor::{AttemptContext, ClaimExecutor};
pub use monitor::Monitor;
