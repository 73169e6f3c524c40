//! Durable log of viewer-submitted tracking events.
//!
//! The log is a single JSON array on disk. Every append stamps the event
//! with the server time, reads the whole array, appends the entry and
//! rewrites the file. All appends go through one writer task that owns the
//! file, so concurrent submissions are applied one after another and none
//! is lost.

use crate::error::TrackingError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Appends queued before submitters start waiting for the writer.
const WRITER_QUEUE: usize = 256;

/// One logged event: the server timestamp followed by the client's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEntry {
    /// ISO-8601 UTC time the server received the event
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TrackingEntry {
    /// Stamp a client payload with the given time.
    ///
    /// The payload must be a JSON object or null; null logs the timestamp
    /// alone. A client-supplied `timestamp` field is replaced by the
    /// server's.
    pub fn stamp(payload: Value, at: DateTime<Utc>) -> Result<Self, TrackingError> {
        let mut fields = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(TrackingError::InvalidPayload(json_kind(&other))),
        };
        fields.remove("timestamp");

        Ok(Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            fields,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode log file contents. Anything but a JSON array is an error.
fn parse_log(content: &str) -> Result<Vec<Value>, String> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(other) => Err(format!("expected an array, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

/// Read the log from disk, treating a missing or corrupt file as empty.
pub fn read_entries(path: &Path) -> Vec<Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_log(&content).unwrap_or_else(|e| {
            tracing::warn!("Tracking log {} is unreadable ({e}), treating as empty", path.display());
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

async fn load_entries(path: &Path) -> Vec<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_log(&content).unwrap_or_else(|e| {
            tracing::warn!("Tracking log {} is unreadable ({e}), starting fresh", path.display());
            Vec::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No existing tracking log at {}, starting fresh", path.display());
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Could not read tracking log {}: {e}, starting fresh", path.display());
            Vec::new()
        }
    }
}

/// Read-modify-write a single entry onto the log file.
async fn append_to_file(path: &Path, entry: &TrackingEntry) -> Result<usize, TrackingError> {
    let write_err = |source| TrackingError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut entries = load_entries(path).await;
    entries.push(serde_json::to_value(entry)?);
    let json = serde_json::to_string_pretty(&entries)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    // Write next to the log and rename over it so readers never see a
    // half-written file
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;

    Ok(entries.len())
}

struct AppendRequest {
    payload: Value,
    reply: oneshot::Sender<Result<TrackingEntry, TrackingError>>,
}

/// Handle to the tracking log writer.
///
/// Cheap to clone; every clone feeds the same writer task. The task exits
/// once all handles are dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct TrackingLog {
    sender: mpsc::Sender<AppendRequest>,
    path: PathBuf,
}

impl std::fmt::Debug for AppendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendRequest").finish_non_exhaustive()
    }
}

impl TrackingLog {
    /// Start the writer task for the log at `path`.
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (sender, receiver) = mpsc::channel(WRITER_QUEUE);
        let handle = tokio::spawn(writer_task(path.clone(), receiver));
        (Self { sender, path }, handle)
    }

    /// Append an event, returning the entry as stored.
    pub async fn append(&self, payload: Value) -> Result<TrackingEntry, TrackingError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(AppendRequest { payload, reply })
            .await
            .map_err(|_| TrackingError::WriterClosed)?;
        response.await.map_err(|_| TrackingError::WriterClosed)?
    }

    /// Current contents of the log.
    pub async fn entries(&self) -> Vec<Value> {
        load_entries(&self.path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn writer_task(path: PathBuf, mut receiver: mpsc::Receiver<AppendRequest>) {
    tracing::debug!("Tracking log writer started for {}", path.display());

    while let Some(AppendRequest { payload, reply }) = receiver.recv().await {
        let result = match TrackingEntry::stamp(payload, Utc::now()) {
            Ok(entry) => match append_to_file(&path, &entry).await {
                Ok(total) => {
                    tracing::debug!("Tracking entry saved ({total} total)");
                    Ok(entry)
                }
                Err(e) => {
                    tracing::error!("Error saving tracking data: {e}");
                    Err(e)
                }
            },
            Err(e) => {
                tracing::warn!("Rejected tracking data: {e}");
                Err(e)
            }
        };
        // Submitter may have gone away; the entry is on disk either way
        let _ = reply.send(result);
    }

    tracing::debug!("Tracking log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_puts_timestamp_first() {
        let at = DateTime::parse_from_rfc3339("2024-01-22T10:00:01.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = TrackingEntry::stamp(json!({"gaze": "left", "timestamp": "spoofed"}), at)
            .unwrap();

        assert_eq!(entry.timestamp, "2024-01-22T10:00:01.500Z");
        let text = serde_json::to_string(&entry).unwrap();
        assert_eq!(text, r#"{"timestamp":"2024-01-22T10:00:01.500Z","gaze":"left"}"#);
    }

    #[test]
    fn test_stamp_rejects_non_objects() {
        for payload in [json!(1), json!("x"), json!([1, 2]), json!(true)] {
            assert!(matches!(
                TrackingEntry::stamp(payload, Utc::now()),
                Err(TrackingError::InvalidPayload(_))
            ));
        }
    }

    #[test]
    fn test_stamp_null_logs_timestamp_only() {
        let at = DateTime::parse_from_rfc3339("2024-01-22T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = TrackingEntry::stamp(Value::Null, at).unwrap();

        assert!(entry.fields.is_empty());
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"timestamp":"2024-01-22T10:00:00.000Z"}"#
        );
    }

    #[test]
    fn test_parse_log() {
        assert_eq!(parse_log("[]").unwrap().len(), 0);
        assert_eq!(parse_log(r#"[{"a":1}]"#).unwrap().len(), 1);
        assert!(parse_log("{}").is_err());
        assert!(parse_log("").is_err());
        assert!(parse_log("[{").is_err());
    }

    #[tokio::test]
    async fn test_append_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking_data.json");
        let (log, writer) = TrackingLog::spawn(&path);

        let a = log.append(json!({"engagement": "High", "gaze": "center"})).await.unwrap();
        let b = log.append(json!({"engagement": "Low", "emotion": "sad"})).await.unwrap();

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], serde_json::to_value(&a).unwrap());
        assert_eq!(entries[1], serde_json::to_value(&b).unwrap());
        assert_eq!(entries[0]["gaze"], "center");
        assert_eq!(entries[1]["emotion"], "sad");
        assert!(entries[0]["timestamp"].as_str().unwrap().ends_with('Z'));

        drop(log);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_log_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking_data.json");
        std::fs::write(&path, "{ not json").unwrap();

        let (log, _writer) = TrackingLog::spawn(&path);
        log.append(json!({"event": "a"})).await.unwrap();

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["event"], "a");
    }

    #[tokio::test]
    async fn test_missing_log_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tracking_data.json");

        let (log, _writer) = TrackingLog::spawn(&path);
        log.append(json!({"event": "a"})).await.unwrap();

        assert_eq!(read_entries(&path).len(), 1);
    }

    #[tokio::test]
    async fn test_prior_entries_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking_data.json");
        std::fs::write(&path, r#"[{"legacy": true}, 42]"#).unwrap();

        let (log, _writer) = TrackingLog::spawn(&path);
        log.append(json!({"event": "new"})).await.unwrap();

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], json!({"legacy": true}));
        assert_eq!(entries[1], json!(42));
        assert_eq!(entries[2]["event"], "new");
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking_data.json");
        let (log, _writer) = TrackingLog::spawn(&path);

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move { log.append(json!({ "seq": i })).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = log.entries().await;
        assert_eq!(entries.len(), 25);
        let mut seqs: Vec<i64> = entries.iter().map(|e| e["seq"].as_i64().unwrap()).collect();
        seqs.sort();
        assert_eq!(seqs, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let (log, _writer) = TrackingLog::spawn(blocker.join("tracking_data.json"));
        let result = log.append(json!({"event": "a"})).await;
        assert!(matches!(result, Err(TrackingError::Write { .. })));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking_data.json");
        let (log, _writer) = TrackingLog::spawn(&path);

        let result = log.append(json!("just a string")).await;
        assert!(matches!(result, Err(TrackingError::InvalidPayload("a string"))));
        assert!(!path.exists());
    }
}
