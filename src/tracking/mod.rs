//! Tracking events submitted by viewers.

pub mod log;

pub use log::{read_entries, TrackingEntry, TrackingLog};
