//! Engagement scoring from facial expression records.
//!
//! A face counts as engaged in proportion to the probability mass it puts on
//! the engaged expressions (neutral, happy, surprised). The per-frame score is
//! the mean over all detected faces.

use crate::collector::types::{Emotion, ExpressionRecord};
use serde::{Deserialize, Serialize};

/// Expressions whose probabilities count towards engagement.
pub const ENGAGED_EMOTIONS: [Emotion; 3] = [Emotion::Neutral, Emotion::Happy, Emotion::Surprised];

/// Scores strictly above this are `High`.
const HIGH_THRESHOLD: f64 = 0.7;

/// Scores strictly above this are `Medium`.
const MEDIUM_THRESHOLD: f64 = 0.4;

/// Discretised engagement level.
///
/// `Unknown` covers both "no face in frame" and "measured zero engagement";
/// the snapshot's face count tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
    Unknown,
}

impl EngagementLevel {
    /// Map a score to a level. First matching threshold wins.
    pub fn from_score(score: f64) -> Self {
        if score > HIGH_THRESHOLD {
            EngagementLevel::High
        } else if score > MEDIUM_THRESHOLD {
            EngagementLevel::Medium
        } else if score > 0.0 {
            EngagementLevel::Low
        } else {
            EngagementLevel::Unknown
        }
    }
}

impl std::fmt::Display for EngagementLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngagementLevel::High => "High",
            EngagementLevel::Medium => "Medium",
            EngagementLevel::Low => "Low",
            EngagementLevel::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Per-frame engagement result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSnapshot {
    pub level: EngagementLevel,
    pub score: f64,
    pub face_count: u32,
}

/// Engagement contribution of a single face.
pub fn face_engagement(record: &ExpressionRecord) -> f64 {
    ENGAGED_EMOTIONS.iter().map(|&e| record.get(e)).sum()
}

/// Score a batch of per-face records.
pub fn score(records: &[ExpressionRecord]) -> EngagementSnapshot {
    let face_count = records.len() as u32;
    let score = if records.is_empty() {
        0.0
    } else {
        records.iter().map(face_engagement).sum::<f64>() / records.len() as f64
    };

    EngagementSnapshot {
        level: EngagementLevel::from_score(score),
        score,
        face_count,
    }
}
