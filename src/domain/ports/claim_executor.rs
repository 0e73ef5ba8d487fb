use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::StrikeError;
use crate::domain::models::{Agent, Opportunity};

/// Per-attempt context handed to the executor.
///
/// `cancel` is a child of the strike's token. Implementations must return
/// promptly once it is cancelled and release any held browser resource on
/// every exit path.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Strike this attempt belongs to
    pub strike_id: Uuid,
    /// Position of the agent in the stagger order
    pub index: usize,
    /// Cancellation signal (early termination or shutdown)
    pub cancel: CancellationToken,
    /// Upper bound for the attempt, as enforced by the coordinator
    pub timeout: std::time::Duration,
    /// Human-paced pause to take before the first browser action
    pub action_delay: std::time::Duration,
}

/// Port for performing a single claim attempt
///
/// # Examples
///
/// ```no_run
/// use ticketstrike::domain::ports::{AttemptContext, ClaimExecutor};
/// use ticketstrike::domain::models::{Agent, Opportunity};
///
/// async fn example(exec: &dyn ClaimExecutor, ctx: AttemptContext, opp: &Opportunity, agent: &Agent) {
///     match exec.attempt(ctx, opp, agent).await {
///         Ok(true) => println!("claimed"),
///         Ok(false) => println!("lost the race"),
///         Err(e) => println!("failed: {e}"),
///     }
/// }
/// ```
#[async_trait]
pub trait ClaimExecutor: Send + Sync {
    /// Attempt to claim `opportunity` with `agent`.
    ///
    /// * `Ok(true)` - the claim was confirmed
    /// * `Ok(false)` - the attempt completed without securing the listing
    /// * `Err` - classified failure (blocked, transient, rejected)
    async fn attempt(
        &self,
        ctx: AttemptContext,
        opportunity: &Opportunity,
        agent: &Agent,
    ) -> Result<bool, StrikeError>;
}
