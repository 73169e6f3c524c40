//! Pipeline statistics.
//!
//! Counts what the monitor has done since start-up so operators can see it
//! working (or failing) without reading logs. Nothing about frame content is
//! recorded here.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters, updated from the capture loop, the server and the
/// tracking log.
#[derive(Debug)]
pub struct PipelineStats {
    /// Ticks that started processing
    ticks_started: AtomicU64,
    /// Ticks dropped because the previous one was still running
    ticks_skipped: AtomicU64,
    /// Frames broadcast to viewers
    frames_published: AtomicU64,
    capture_failures: AtomicU64,
    detection_failures: AtomicU64,
    render_failures: AtomicU64,
    /// Viewers currently connected
    viewers_connected: AtomicU64,
    /// Viewers connected since start-up
    viewers_total: AtomicU64,
    tracking_appended: AtomicU64,
    tracking_failed: AtomicU64,
    started_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            ticks_started: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            detection_failures: AtomicU64::new(0),
            render_failures: AtomicU64::new(0),
            viewers_connected: AtomicU64::new(0),
            viewers_total: AtomicU64::new(0),
            tracking_appended: AtomicU64::new(0),
            tracking_failed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_tick_started(&self) {
        self.ticks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed tick under the stage that failed.
    pub fn record_failure(&self, error: &PipelineError) {
        let counter = match error {
            PipelineError::Capture(_) => &self.capture_failures,
            PipelineError::Detection(_) => &self.detection_failures,
            PipelineError::Render(_) | PipelineError::Publish(_) | PipelineError::Join(_) => {
                &self.render_failures
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_viewer_connected(&self) {
        self.viewers_connected.fetch_add(1, Ordering::Relaxed);
        self.viewers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_viewer_disconnected(&self) {
        // Saturate at zero
        let _ = self
            .viewers_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_tracking_appended(&self) {
        self.tracking_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tracking_failed(&self) {
        self.tracking_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_started: self.ticks_started.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            viewers_connected: self.viewers_connected.load(Ordering::Relaxed),
            viewers_total: self.viewers_total.load(Ordering::Relaxed),
            tracking_appended: self.tracking_appended.load(Ordering::Relaxed),
            tracking_failed: self.tracking_failed.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Summary string for display on shutdown.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Ticks started: {}\n\
             - Ticks skipped (previous tick busy): {}\n\
             - Frames published: {}\n\
             - Failures: {} capture, {} detection, {} render\n\
             - Viewers: {} connected, {} total\n\
             - Tracking entries: {} appended, {} failed\n\
             - Uptime: {} seconds",
            stats.ticks_started,
            stats.ticks_skipped,
            stats.frames_published,
            stats.capture_failures,
            stats.detection_failures,
            stats.render_failures,
            stats.viewers_connected,
            stats.viewers_total,
            stats.tracking_appended,
            stats.tracking_failed,
            stats.uptime_secs
        )
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ticks_started: u64,
    pub ticks_skipped: u64,
    pub frames_published: u64,
    pub capture_failures: u64,
    pub detection_failures: u64,
    pub render_failures: u64,
    pub viewers_connected: u64,
    pub viewers_total: u64,
    pub tracking_appended: u64,
    pub tracking_failed: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared statistics.
pub type SharedStats = Arc<PipelineStats>;

/// Create new shared statistics.
pub fn create_shared_stats() -> SharedStats {
    Arc::new(PipelineStats::new())
}
