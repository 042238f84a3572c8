use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Severity of a [`LogRecord`]. Only membership matters, there is no ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::TRACE => LogLevel::Trace,
        }
    }
}

/// Error returned when a string does not name a [`LogLevel`].
#[derive(thiserror::Error, Debug)]
#[error("unknown log level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

/// One structured log event.
///
/// Everything except `uploaded` is fixed at creation. `uploaded` only ever
/// moves from `false` to `true`, and only the store flips it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub level: LogLevel,
    pub title: String,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub uploaded: bool,
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Current epoch milliseconds, never smaller than a value previously handed
/// out by this process.
pub fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_TIMESTAMP.fetch_max(now, Ordering::SeqCst);
    prev.max(now)
}

impl LogRecord {
    /// Build a fresh, not yet uploaded record with a new id and timestamp.
    pub fn new(
        level: LogLevel,
        title: impl Into<String>,
        data: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            level,
            title: title.into(),
            data,
            timestamp: next_timestamp(),
            uploaded: false,
        }
    }

    /// Projection sent over the wire; `uploaded` is never transmitted.
    pub fn to_wire(&self) -> WireLog<'_> {
        WireLog {
            id: &self.id,
            level: self.level,
            title: &self.title,
            data: &self.data,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireLog<'a> {
    pub id: &'a str,
    pub level: LogLevel,
    pub title: &'a str,
    pub data: &'a BTreeMap<String, serde_json::Value>,
    pub timestamp: i64,
}

/// Request body posted to the remote collector.
#[derive(Debug, Serialize)]
pub struct UploadPayload<'a> {
    pub logs: Vec<WireLog<'a>>,
    #[serde(rename = "uploadTime")]
    pub upload_time: i64,
}

impl<'a> UploadPayload<'a> {
    pub fn new(batch: &'a [LogRecord]) -> Self {
        Self {
            logs: batch.iter().map(LogRecord::to_wire).collect(),
            upload_time: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_records_get_unique_ids_and_ordered_timestamps() {
        let a = LogRecord::new(LogLevel::Info, "first", BTreeMap::new());
        let b = LogRecord::new(LogLevel::Info, "second", BTreeMap::new());
        assert_ne!(a.id, b.id);
        assert!(b.timestamp >= a.timestamp);
        assert!(!a.uploaded);
    }

    #[test]
    fn payload_omits_uploaded_flag() {
        let mut data = BTreeMap::new();
        data.insert("user".to_string(), json!(42));
        let mut record = LogRecord::new(LogLevel::Warn, "disk almost full", data);
        record.uploaded = true;

        let batch = vec![record.clone()];
        let body = serde_json::to_value(UploadPayload::new(&batch)).unwrap();

        let log = &body["logs"][0];
        assert_eq!(log["id"], json!(record.id));
        assert_eq!(log["level"], json!("warn"));
        assert_eq!(log["title"], json!("disk almost full"));
        assert_eq!(log["data"]["user"], json!(42));
        assert_eq!(log["timestamp"], json!(record.timestamp));
        assert!(log.get("uploaded").is_none());
        assert!(body["uploadTime"].is_i64());
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("fatal".parse::<LogLevel>().is_err());
    }
}
