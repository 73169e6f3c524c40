//! The capture loop.
//!
//! A fixed-period timer drives one tick per period. Each tick:
//!
//! 1. grabs a frame from the camera
//! 2. base64-encodes it for transport
//! 3. decodes it for the detector
//! 4. detects per-face expressions
//! 5. scores engagement
//! 6. pushes the score onto the rolling history
//! 7. renders the history chart
//! 8. publishes `{image, engagementData, chart}` to all viewers
//!
//! A failure in any step aborts that tick only. The timer keeps running and
//! the next tick starts from scratch.

use crate::channel::{BroadcastPayload, Broadcaster};
use crate::collector::{ExpressionDetector, FrameSource};
use crate::config::{Config, OverlapPolicy};
use crate::core::chart::ChartRenderer;
use crate::core::history::{create_shared_history, SharedHistory};
use crate::core::scoring::{self, EngagementSnapshot};
use crate::error::{CaptureError, DetectionError, PipelineError};
use crate::transparency::SharedStats;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Timing and history settings for the loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub interval: Duration,
    pub history_capacity: usize,
    pub overlap: OverlapPolicy,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.tick_interval,
            history_capacity: config.history_capacity,
            overlap: config.overlap_policy,
        }
    }
}

/// Result of a successful tick.
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    pub snapshot: EngagementSnapshot,
    /// When the published frame was acquired
    pub captured_at: DateTime<Utc>,
    /// Viewers the frame was queued for
    pub viewers: usize,
}

/// Clears the in-flight flag when a tick finishes, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Timer-driven capture, scoring and broadcast pipeline.
pub struct CaptureLoop {
    camera: Arc<dyn FrameSource>,
    detector: Arc<dyn ExpressionDetector>,
    renderer: Arc<ChartRenderer>,
    history: SharedHistory,
    broadcaster: Broadcaster,
    stats: SharedStats,
    settings: LoopSettings,
    in_flight: Arc<AtomicBool>,
    ticks: AtomicU64,
}

impl CaptureLoop {
    pub fn new(
        camera: Arc<dyn FrameSource>,
        detector: Arc<dyn ExpressionDetector>,
        broadcaster: Broadcaster,
        stats: SharedStats,
        settings: LoopSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            camera,
            detector,
            renderer: Arc::new(ChartRenderer::default()),
            history: create_shared_history(settings.history_capacity),
            broadcaster,
            stats,
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
            ticks: AtomicU64::new(0),
        })
    }

    /// The rolling history, for read-only consumers.
    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.history)
    }

    /// Start the timer on the runtime.
    ///
    /// Send on (or drop) the returned sender to stop the loop. Ticks already
    /// in flight run to completion.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, oneshot::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Capture loop started: every {}ms from {} using {} detector ({:?} overlap)",
            self.settings.interval.as_millis(),
            self.camera.describe(),
            self.detector.name(),
            self.settings.overlap
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.dispatch(),
                _ = &mut shutdown => {
                    tracing::info!("Capture loop shutting down");
                    break;
                }
            }
        }
    }

    /// Start one tick according to the overlap policy.
    fn dispatch(self: &Arc<Self>) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        match self.settings.overlap {
            OverlapPolicy::Allow => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.process_tick(tick).await });
            }
            OverlapPolicy::Skip => {
                if self
                    .in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    self.stats.record_tick_skipped();
                    tracing::debug!(tick, "Previous tick still running, skipping");
                    return;
                }
                let guard = InFlightGuard(Arc::clone(&self.in_flight));
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let _guard = guard;
                    this.process_tick(tick).await;
                });
            }
        }
    }

    /// Run one tick, logging and counting the outcome.
    async fn process_tick(&self, tick: u64) {
        self.stats.record_tick_started();

        match self.run_tick().await {
            Ok(outcome) => {
                self.stats.record_frame_published();
                tracing::debug!(
                    tick,
                    level = %outcome.snapshot.level,
                    score = outcome.snapshot.score,
                    faces = outcome.snapshot.face_count,
                    viewers = outcome.viewers,
                    captured_at = %outcome.captured_at,
                    "Frame published"
                );
            }
            Err(e) => {
                self.stats.record_failure(&e);
                tracing::warn!(tick, "Tick aborted: {e}");
            }
        }
    }

    /// Capture, score, render and publish a single frame.
    pub async fn run_tick(&self) -> Result<TickOutcome, PipelineError> {
        let camera = Arc::clone(&self.camera);
        let detector = Arc::clone(&self.detector);
        let (encoded_frame, captured_at, records) = tokio::task::spawn_blocking(move || {
            let frame = camera.capture()?;
            if frame.is_empty() {
                let error = CaptureError::Unavailable("camera returned an empty frame".into());
                return Err(PipelineError::from(error));
            }
            tracing::trace!(bytes = frame.len(), "Frame captured");
            let encoded = BASE64.encode(&frame.jpeg);
            let decoded = image::load_from_memory(&frame.jpeg)
                .map_err(|e| DetectionError::MalformedImage(e.to_string()))?;
            let records = detector.detect(&decoded)?;
            Ok::<_, PipelineError>((encoded, frame.captured_at, records))
        })
        .await??;

        let snapshot = scoring::score(&records);

        // Push and snapshot under one guard so the chart matches this tick
        let series = {
            let mut history = self.history.write().await;
            history.push(snapshot.score);
            history.values()
        };

        let renderer = Arc::clone(&self.renderer);
        let chart = tokio::task::spawn_blocking(move || renderer.render(&series)).await??;

        let viewers = self.broadcaster.publish(BroadcastPayload {
            image: encoded_frame,
            engagement_data: snapshot,
            chart: BASE64.encode(chart),
        })?;

        Ok(TickOutcome {
            snapshot,
            captured_at,
            viewers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ServerEvent;
    use crate::collector::{Emotion, ExpressionRecord, SyntheticCamera};
    use crate::core::scoring::EngagementLevel;
    use crate::collector::Frame;
    use crate::transparency::create_shared_stats;
    use image::DynamicImage;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Detector replaying scripted results, then reporting one happy face.
    struct ScriptedDetector {
        script: Mutex<VecDeque<Result<Vec<ExpressionRecord>, DetectionError>>>,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Result<Vec<ExpressionRecord>, DetectionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl ExpressionDetector for ScriptedDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<ExpressionRecord>, DetectionError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![happy_face()]))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Camera that blocks for a while before delegating.
    struct SlowCamera {
        inner: SyntheticCamera,
        delay: Duration,
    }

    impl FrameSource for SlowCamera {
        fn capture(&self) -> Result<Frame, CaptureError> {
            std::thread::sleep(self.delay);
            self.inner.capture()
        }

        fn describe(&self) -> String {
            "slow".to_string()
        }
    }

    struct BrokenCamera;

    impl FrameSource for BrokenCamera {
        fn capture(&self) -> Result<Frame, CaptureError> {
            Err(CaptureError::Unavailable("unplugged".to_string()))
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    /// Camera handing over zero bytes.
    struct BlankCamera;

    impl FrameSource for BlankCamera {
        fn capture(&self) -> Result<Frame, CaptureError> {
            Ok(Frame::new(Vec::new()))
        }

        fn describe(&self) -> String {
            "blank".to_string()
        }
    }

    fn happy_face() -> ExpressionRecord {
        ExpressionRecord::new()
            .with(Emotion::Happy, 0.9)
            .with(Emotion::Sad, 0.1)
    }

    fn settings(overlap: OverlapPolicy) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_millis(20),
            history_capacity: 3,
            overlap,
        }
    }

    fn build(
        camera: Arc<dyn FrameSource>,
        detector: Arc<dyn ExpressionDetector>,
        overlap: OverlapPolicy,
    ) -> (Arc<CaptureLoop>, Broadcaster, SharedStats) {
        let broadcaster = Broadcaster::new(8);
        let stats = create_shared_stats();
        let capture = CaptureLoop::new(
            camera,
            detector,
            broadcaster.clone(),
            Arc::clone(&stats),
            settings(overlap),
        );
        (capture, broadcaster, stats)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_tick_publishes_frame_score_and_chart() {
        let (capture, broadcaster, _stats) = build(
            Arc::new(SyntheticCamera::new(64, 48, 80)),
            Arc::new(ScriptedDetector::new(vec![])),
            OverlapPolicy::Skip,
        );
        let mut viewer = broadcaster.subscribe();

        let before = chrono::Utc::now();
        let outcome = capture.run_tick().await.unwrap();
        assert_eq!(outcome.viewers, 1);
        assert_eq!(outcome.snapshot.level, EngagementLevel::High);
        assert!(outcome.captured_at >= before);

        let message = viewer.recv().await.unwrap();
        let ServerEvent::Frame(payload) = serde_json::from_str::<ServerEvent>(&message).unwrap() else {
            panic!("expected a frame event");
        };

        let jpeg = BASE64.decode(&payload.image).unwrap();
        assert_eq!(
            image::guess_format(&jpeg).unwrap(),
            image::ImageFormat::Jpeg
        );
        let png = BASE64.decode(&payload.chart).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
        assert_eq!(payload.engagement_data.face_count, 1);
        assert!((payload.engagement_data.score - 0.9).abs() < 1e-9);

        assert_eq!(capture.history().read().await.values().len(), 1);
    }

    #[tokio::test]
    async fn test_no_faces_pushes_zero() {
        let (capture, _broadcaster, _stats) = build(
            Arc::new(SyntheticCamera::new(32, 32, 80)),
            Arc::new(ScriptedDetector::new(vec![Ok(vec![])])),
            OverlapPolicy::Skip,
        );

        let outcome = capture.run_tick().await.unwrap();
        assert_eq!(outcome.snapshot.level, EngagementLevel::Unknown);
        assert_eq!(outcome.snapshot.face_count, 0);
        assert_eq!(capture.history().read().await.values(), vec![0.0]);
    }

    #[tokio::test]
    async fn test_failed_tick_is_isolated() {
        let (capture, broadcaster, stats) = build(
            Arc::new(SyntheticCamera::new(32, 32, 80)),
            Arc::new(ScriptedDetector::new(vec![Err(DetectionError::Backend(
                "inference failed".to_string(),
            ))])),
            OverlapPolicy::Skip,
        );
        let mut viewer = broadcaster.subscribe();

        capture.process_tick(1).await;
        assert!(viewer.try_recv().is_err());

        capture.process_tick(2).await;
        let message = viewer.recv().await.unwrap();
        assert!(message.contains(r#""event":"frame""#));
        assert!(viewer.try_recv().is_err());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks_started, 2);
        assert_eq!(snapshot.detection_failures, 1);
        assert_eq!(snapshot.frames_published, 1);
        assert_eq!(capture.history().read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_is_counted() {
        let (capture, _broadcaster, stats) = build(
            Arc::new(BrokenCamera),
            Arc::new(ScriptedDetector::new(vec![])),
            OverlapPolicy::Skip,
        );

        assert!(matches!(
            capture.run_tick().await,
            Err(PipelineError::Capture(_))
        ));
        capture.process_tick(1).await;
        assert_eq!(stats.snapshot().capture_failures, 1);
        assert!(capture.history().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_frame_is_a_capture_failure() {
        let (capture, _broadcaster, stats) = build(
            Arc::new(BlankCamera),
            Arc::new(ScriptedDetector::new(vec![])),
            OverlapPolicy::Skip,
        );

        assert!(matches!(
            capture.run_tick().await,
            Err(PipelineError::Capture(CaptureError::Unavailable(_)))
        ));
        capture.process_tick(1).await;
        assert_eq!(stats.snapshot().capture_failures, 1);
        assert_eq!(stats.snapshot().detection_failures, 0);
    }

    #[tokio::test]
    async fn test_history_is_bounded_across_ticks() {
        let (capture, _broadcaster, _stats) = build(
            Arc::new(SyntheticCamera::new(32, 32, 80)),
            Arc::new(ScriptedDetector::new(vec![
                Ok(vec![ExpressionRecord::new().with(Emotion::Neutral, 0.1)]),
                Ok(vec![ExpressionRecord::new().with(Emotion::Neutral, 0.2)]),
                Ok(vec![ExpressionRecord::new().with(Emotion::Neutral, 0.3)]),
                Ok(vec![ExpressionRecord::new().with(Emotion::Neutral, 0.4)]),
            ])),
            OverlapPolicy::Skip,
        );

        for _ in 0..4 {
            capture.run_tick().await.unwrap();
        }
        assert_eq!(capture.history().read().await.values(), vec![0.2, 0.3, 0.4]);
    }

    #[tokio::test]
    async fn test_skip_policy_drops_overlapping_tick() {
        let camera = SlowCamera {
            inner: SyntheticCamera::new(32, 32, 80),
            delay: Duration::from_millis(150),
        };
        let (capture, _broadcaster, stats) = build(
            Arc::new(camera),
            Arc::new(ScriptedDetector::new(vec![])),
            OverlapPolicy::Skip,
        );

        capture.dispatch();
        capture.dispatch();
        assert_eq!(stats.snapshot().ticks_skipped, 1);

        wait_until(|| stats.snapshot().frames_published == 1).await;

        // Guard released, so the next tick runs
        capture.dispatch();
        wait_until(|| stats.snapshot().frames_published == 2).await;
        assert_eq!(stats.snapshot().ticks_skipped, 1);
    }

    #[tokio::test]
    async fn test_allow_policy_runs_overlapping_ticks() {
        let camera = SlowCamera {
            inner: SyntheticCamera::new(32, 32, 80),
            delay: Duration::from_millis(100),
        };
        let (capture, _broadcaster, stats) = build(
            Arc::new(camera),
            Arc::new(ScriptedDetector::new(vec![])),
            OverlapPolicy::Allow,
        );

        capture.dispatch();
        capture.dispatch();

        wait_until(|| stats.snapshot().frames_published == 2).await;
        assert_eq!(stats.snapshot().ticks_skipped, 0);
        assert_eq!(capture.history().read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_loop_runs_until_shutdown() {
        let (capture, _broadcaster, stats) = build(
            Arc::new(SyntheticCamera::new(32, 32, 80)),
            Arc::new(ScriptedDetector::new(vec![])),
            OverlapPolicy::Skip,
        );

        let (handle, shutdown) = Arc::clone(&capture).spawn();
        wait_until(|| stats.snapshot().frames_published >= 2).await;

        shutdown.send(()).unwrap();
        handle.await.unwrap();

        // Let any tick dispatched just before shutdown finish
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = stats.snapshot().ticks_started;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.snapshot().ticks_started, started);
    }
}
