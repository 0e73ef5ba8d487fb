//! Simulated collaborators for dry runs and tests
//!
//! Stand-ins for the browser-driven executor and the page-scraping monitors.

pub mod executor;
pub mod monitor;

pub use executor::{SimulatedExecutor, SimulationProfile};
pub use monitor::SimulatedMonitor;
