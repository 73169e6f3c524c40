//! Error types for the capture pipeline and the tracking log.

use std::path::PathBuf;
use thiserror::Error;

/// Camera acquisition failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read frame from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

/// Expression detection failures.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection model not loaded")]
    ModelNotLoaded,

    #[error("Malformed image: {0}")]
    MalformedImage(String),

    #[error("Detector failed: {0}")]
    Backend(String),
}

/// Chart rendering failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to encode chart: {0}")]
    Encode(String),
}

/// Anything that aborts a single capture tick.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to encode frame event: {0}")]
    Publish(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Tracking log append failures.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Tracking payload must be a JSON object, got {0}")]
    InvalidPayload(&'static str),

    #[error("Failed to write tracking log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize tracking log: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Tracking log writer is not running")]
    WriterClosed,
}
