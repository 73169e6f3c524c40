//! Engagement Monitor - webcam engagement sampling for live viewers.
//!
//! On a fixed timer the monitor grabs a camera frame, detects facial
//! expressions, reduces them to an engagement score and pushes the frame,
//! the score and a trend chart of recent scores to every connected viewer.
//! Viewers can send tracking events back, which are appended to a JSON log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Engagement Monitor                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐       │
//! │  │  Camera  │──▶│ Detector │──▶│ Scoring  │──▶│ History  │       │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────────┘       │
//! │        │                                            │             │
//! │        ▼                                            ▼             │
//! │  ┌──────────────────────────────────────┐    ┌──────────┐         │
//! │  │      Broadcaster ("frame" events)    │◀───│  Chart   │         │
//! │  └──────────────────────────────────────┘    └──────────┘         │
//! │        │  WebSocket /ws                                           │
//! │        ▼                                                          │
//! │  ┌──────────┐  "trackingData"   ┌──────────────┐                  │
//! │  │ Viewers  │──────────────────▶│ Tracking log │                  │
//! │  └──────────┘                   └──────────────┘                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use engagement_monitor::{
//!     collector::{NoopDetector, SyntheticCamera},
//!     core::{CaptureLoop, LoopSettings},
//!     transparency::create_shared_stats,
//!     Broadcaster, Config,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let config = Config::default();
//! let capture = CaptureLoop::new(
//!     Arc::new(SyntheticCamera::new(640, 480, 90)),
//!     Arc::new(NoopDetector::new()),
//!     Broadcaster::default(),
//!     create_shared_stats(),
//!     LoopSettings::from(&config),
//! );
//! let (_handle, _stop) = capture.spawn();
//! # }
//! ```

pub mod channel;
pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod server;
pub mod tracking;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use channel::{BroadcastPayload, Broadcaster, ClientEvent, ServerEvent, TrackingResult};
pub use collector::{Emotion, ExpressionDetector, ExpressionRecord, Frame, FrameSource};
pub use config::{CameraSource, Config, OverlapPolicy};
pub use self::core::{score, CaptureLoop, EngagementLevel, EngagementSnapshot, RollingHistory};
pub use error::{CaptureError, DetectionError, PipelineError, RenderError, TrackingError};
pub use tracking::{TrackingEntry, TrackingLog};
pub use transparency::{PipelineStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
