//! Real-time channel protocol and frame fan-out.
//!
//! Every message on the viewer WebSocket is a JSON text frame of the form
//! `{"event": <name>, "data": <payload>}`.
//!
//! ```text
//! server → viewer   "frame"           { image, engagementData, chart }
//! viewer → server   "trackingData"    { ...arbitrary fields }
//! server → viewer   "trackingResult"  { ok, error? }
//! ```

use crate::core::scoring::EngagementSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Frames buffered per viewer before a slow viewer starts skipping.
pub const DEFAULT_VIEWER_BUFFER: usize = 16;

/// One tick's output, as sent to every viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    /// Base64 JPEG frame
    pub image: String,
    pub engagement_data: EngagementSnapshot,
    /// Base64 PNG chart of the rolling history
    pub chart: String,
}

/// Outcome of a tracking submission, sent back to the submitting viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackingResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "frame")]
    Frame(BroadcastPayload),
    #[serde(rename = "trackingResult")]
    TrackingResult(TrackingResult),
}

impl ServerEvent {
    /// Serialize to a WebSocket text message.
    pub fn to_message(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// Messages viewers send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "trackingData")]
    TrackingData(serde_json::Value),
}

/// Envelope as received; `data` may be absent.
#[derive(Deserialize)]
struct RawClientEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    /// Decode a viewer message. A missing `data` field reads as null.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawClientEvent = serde_json::from_str(text)?;
        match raw.event.as_str() {
            "trackingData" => Ok(ClientEvent::TrackingData(raw.data)),
            other => Err(serde::de::Error::custom(format!(
                "unknown event `{other}`"
            ))),
        }
    }
}

/// Fans frame payloads out to all connected viewers.
///
/// Delivery is best-effort: a payload is serialized once and handed to every
/// current subscriber. Viewers that fall more than the buffer size behind
/// skip the frames they missed.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<Arc<str>>,
}

impl Broadcaster {
    pub fn new(viewer_buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(viewer_buffer.max(1));
        Self { sender }
    }

    /// Register a viewer. It receives every frame published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.sender.subscribe()
    }

    /// Number of viewers currently subscribed.
    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send a payload as a `"frame"` event to every viewer.
    ///
    /// Returns how many viewers it was queued for; zero when nobody is
    /// watching.
    pub fn publish(&self, payload: BroadcastPayload) -> Result<usize, serde_json::Error> {
        let message = ServerEvent::Frame(payload).to_message()?;
        Ok(self.sender.send(message).unwrap_or(0))
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWER_BUFFER)
    }
}
