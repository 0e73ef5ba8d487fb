pub mod monitor_loop;
pub mod strike_coordinator;
pub mod strike_orchestrator;

pub use monitor_loop::{MonitorLoop, PollSummary};
pub use strike_coordinator::{AttemptReport, StrikeCoordinator, StrikeOutcome, StrikeReport};
pub use strike_orchestrator::{
    Disposition, OrchestratorState, OrchestratorStats, StrikeOrchestrator,
};
