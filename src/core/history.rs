//! Bounded rolling history of engagement scores.
//!
//! Scores are kept oldest first. Once the history is full every push evicts
//! the single oldest score, so the buffer always holds the most recent
//! `capacity` ticks.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of scores retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity FIFO buffer of scores.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingHistory {
    /// Create an empty history. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a score, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Snapshot of the scores, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// Most recent score.
    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Summary statistics over the retained window.
    pub fn summary(&self) -> HistorySummary {
        let (mean, std_dev) = if self.values.is_empty() {
            (None, None)
        } else {
            let mean = Statistics::mean(self.values.iter());
            let std_dev = if self.values.len() > 1 {
                Some(Statistics::std_dev(self.values.iter()))
            } else {
                None
            };
            (Some(mean), std_dev)
        };

        HistorySummary {
            len: self.values.len(),
            capacity: self.capacity,
            latest: self.latest(),
            mean,
            std_dev,
        }
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Summary of the rolling window for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub len: usize,
    pub capacity: usize,
    pub latest: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

/// History shared between the capture loop (writer) and status readers.
pub type SharedHistory = Arc<RwLock<RollingHistory>>;

/// Create a new shared history.
pub fn create_shared_history(capacity: usize) -> SharedHistory {
    Arc::new(RwLock::new(RollingHistory::new(capacity)))
}
