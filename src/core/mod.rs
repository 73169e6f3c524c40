//! Core functionality for the engagement monitor.
//!
//! This module contains:
//! - Engagement scoring from expression records
//! - The bounded rolling history of scores
//! - Trend chart rendering
//! - The timer-driven capture loop tying them together

pub mod chart;
pub mod history;
pub mod pipeline;
pub mod scoring;

// Re-export commonly used types
pub use chart::{ChartRenderer, ChartStyle};
pub use history::{create_shared_history, HistorySummary, RollingHistory, SharedHistory};
pub use pipeline::{CaptureLoop, LoopSettings, TickOutcome};
pub use scoring::{score, EngagementLevel, EngagementSnapshot};
