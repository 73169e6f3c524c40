//! Frame and expression types produced by the collector.
//!
//! Frames and expression records live for a single tick only; nothing here is
//! retained once the tick's payload has been published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Facial expression labels reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Surprised,
    Sad,
    Angry,
    Fearful,
    Disgusted,
}

/// Expression probabilities for one detected face.
///
/// Labels the detector did not report read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionRecord {
    probabilities: BTreeMap<Emotion, f64>,
}

impl ExpressionRecord {
    /// Create an empty record (every label at zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(label, probability)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Emotion, f64)>,
    {
        Self {
            probabilities: pairs.into_iter().collect(),
        }
    }

    /// Set the probability for a label.
    pub fn with(mut self, emotion: Emotion, probability: f64) -> Self {
        self.probabilities.insert(emotion, probability);
        self
    }

    /// Probability for a label, zero when absent.
    pub fn get(&self, emotion: Emotion) -> f64 {
        self.probabilities.get(&emotion).copied().unwrap_or(0.0)
    }
}

/// A single JPEG-encoded camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG bytes as handed over by the camera
    pub jpeg: Vec<u8>,
    /// When the frame was acquired
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            captured_at: Utc::now(),
        }
    }

    /// Size of the encoded frame in bytes.
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_labels_read_as_zero() {
        let record = ExpressionRecord::new().with(Emotion::Happy, 0.8);
        assert_eq!(record.get(Emotion::Happy), 0.8);
        assert_eq!(record.get(Emotion::Sad), 0.0);
    }

    #[test]
    fn test_labels_use_lowercase_wire_names() {
        assert_eq!(
            serde_json::to_string(&Emotion::Surprised).unwrap(),
            r#""surprised""#
        );
        let record = ExpressionRecord::new().with(Emotion::Fearful, 0.25);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"fearful":0.25}"#);
    }

    #[test]
    fn test_record_deserializes_from_label_map() {
        let record: ExpressionRecord =
            serde_json::from_str(r#"{"neutral":0.5,"surprised":0.25}"#).unwrap();
        assert_eq!(record.get(Emotion::Neutral), 0.5);
        assert_eq!(record.get(Emotion::Surprised), 0.25);
    }
}
