use async_trait::async_trait;

use crate::domain::errors::MonitorError;
use crate::domain::models::{Opportunity, Platform};

/// Port for an external opportunity producer bound to one platform
///
/// The core only relies on monitors producing well-formed opportunities;
/// page scraping and selector logic live behind this trait.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Platform this monitor watches, fixed at construction.
    fn platform(&self) -> Platform;

    /// Check the source once and return any listings found.
    async fn check(&self) -> Result<Vec<Opportunity>, MonitorError>;
}
