//! Transparency module for the engagement monitor.
//!
//! Exposes what the monitor has processed so far, for the status endpoint
//! and the shutdown summary.

pub mod stats;

// Re-export commonly used types
pub use stats::{create_shared_stats, PipelineStats, SharedStats, StatsSnapshot};
