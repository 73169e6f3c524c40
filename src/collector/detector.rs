//! Facial expression detection.
//!
//! The detection model is opaque to the rest of the crate: anything that turns
//! a decoded image into per-face [`ExpressionRecord`]s can implement
//! [`ExpressionDetector`]. Model backends share a process-wide
//! [`DetectorEnv`] that must be initialised once before the first detection.

use crate::collector::types::ExpressionRecord;
use crate::error::DetectionError;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File extensions recognised as model weights/manifests.
const MODEL_EXTENSIONS: [&str; 4] = ["bin", "json", "onnx", "pb"];

static DETECTOR_ENV: OnceLock<DetectorEnv> = OnceLock::new();

/// Turns an image into one expression record per detected face.
///
/// Returns an empty vector when no face is found. Ordering of the returned
/// records is implementation-defined.
pub trait ExpressionDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<ExpressionRecord>, DetectionError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Process-wide detector environment.
#[derive(Debug)]
pub struct DetectorEnv {
    model_dir: PathBuf,
    model_files: Vec<PathBuf>,
}

impl DetectorEnv {
    /// Initialise the environment from a model asset directory.
    ///
    /// Only the first call has an effect; later calls return the existing
    /// environment regardless of the path passed.
    pub fn init(model_dir: impl AsRef<Path>) -> &'static DetectorEnv {
        DETECTOR_ENV.get_or_init(|| {
            let model_dir = model_dir.as_ref().to_path_buf();
            let model_files = scan_model_dir(&model_dir);
            if model_files.is_empty() {
                tracing::warn!(
                    "No model assets found in {}; detection backends may fail to load",
                    model_dir.display()
                );
            } else {
                tracing::info!(
                    "Detector environment initialised with {} model file(s) from {}",
                    model_files.len(),
                    model_dir.display()
                );
            }
            DetectorEnv {
                model_dir,
                model_files,
            }
        })
    }

    /// The environment, if [`DetectorEnv::init`] has run.
    pub fn get() -> Option<&'static DetectorEnv> {
        DETECTOR_ENV.get()
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn model_files(&self) -> &[PathBuf] {
        &self.model_files
    }
}

fn scan_model_dir(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| MODEL_EXTENSIONS.contains(&e))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Detector backend that never reports a face.
///
/// This exists so the server runs end to end without a model backend
/// compiled in. It still honours the environment lifecycle.
#[derive(Debug, Default)]
pub struct NoopDetector;

impl NoopDetector {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionDetector for NoopDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<ExpressionRecord>, DetectionError> {
        if DetectorEnv::get().is_none() {
            return Err(DetectionError::ModelNotLoaded);
        }
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
