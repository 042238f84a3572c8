use crate::env::{
    env_opt, LOG_RELAY_BATCH_SIZE_ENV, LOG_RELAY_ENDPOINT_ENV, LOG_RELAY_IDLE_MS_ENV,
    LOG_RELAY_RETENTION_DAYS_ENV, LOG_RELAY_STRATEGY_ENV, LOG_RELAY_UPLOAD_ENV,
};
use crate::error::ConfigWarning;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// When buffered records are sent to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStrategy {
    /// Persist on arrival, send in batches once the host has been idle.
    #[default]
    Idle,
    /// Send every record on its own right after it is persisted.
    Immediate,
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStrategy::Idle => f.write_str("idle"),
            UploadStrategy::Immediate => f.write_str("immediate"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown upload strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for UploadStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(UploadStrategy::Idle),
            "immediate" => Ok(UploadStrategy::Immediate),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Resolved upload settings consumed by the
/// [`UploadCoordinator`](crate::coordinator::UploadCoordinator).
///
/// **Fields**
/// - `upload_logs`: master switch; when `false` records are only persisted.
/// - `endpoint`: collector URL; `None` keeps records local.
/// - `strategy`: [`UploadStrategy::Idle`] or [`UploadStrategy::Immediate`].
/// - `batch_size`: records per request during a sweep, `0` = unbounded.
/// - `retention_days`: records older than this are purged, `0` = never.
/// - `idle_period`: quiet time before an idle sweep fires.
/// - `request_timeout`: per-request timeout of the HTTP sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub upload_logs: bool,
    pub endpoint: Option<String>,
    pub strategy: UploadStrategy,
    pub batch_size: usize,
    pub retention_days: u32,
    #[serde(with = "millis")]
    pub idle_period: Duration,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_logs: true,
            endpoint: None,
            strategy: UploadStrategy::Idle,
            batch_size: 50,
            retention_days: 7,
            idle_period: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

const MIN_IDLE_PERIOD: Duration = Duration::from_millis(10);
const MS_PER_DAY: i64 = 86_400_000;

impl UploadConfig {
    /// Build a configuration from `LOG_RELAY_*` environment variables,
    /// falling back to [`UploadConfig::default`] for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_opt(LOG_RELAY_UPLOAD_ENV) {
            cfg.upload_logs = !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off");
        }
        cfg.endpoint = env_opt(LOG_RELAY_ENDPOINT_ENV);
        if let Some(v) = env_opt(LOG_RELAY_STRATEGY_ENV) {
            match v.parse() {
                Ok(s) => cfg.strategy = s,
                Err(e) => warn!("ignoring {}: {}", LOG_RELAY_STRATEGY_ENV, e),
            }
        }
        if let Some(v) = env_opt(LOG_RELAY_BATCH_SIZE_ENV) {
            match v.trim().parse() {
                Ok(n) => cfg.batch_size = n,
                Err(e) => warn!("ignoring {}={:?}: {}", LOG_RELAY_BATCH_SIZE_ENV, v, e),
            }
        }
        if let Some(v) = env_opt(LOG_RELAY_RETENTION_DAYS_ENV) {
            match v.trim().parse() {
                Ok(n) => cfg.retention_days = n,
                Err(e) => warn!("ignoring {}={:?}: {}", LOG_RELAY_RETENTION_DAYS_ENV, v, e),
            }
        }
        if let Some(v) = env_opt(LOG_RELAY_IDLE_MS_ENV) {
            match v.trim().parse() {
                Ok(ms) => cfg.idle_period = Duration::from_millis(ms),
                Err(e) => warn!("ignoring {}={:?}: {}", LOG_RELAY_IDLE_MS_ENV, v, e),
            }
        }

        cfg
    }

    /// Idle period with a floor so a zero value cannot spin the timer.
    pub fn effective_idle_period(&self) -> Duration {
        self.idle_period.max(MIN_IDLE_PERIOD)
    }

    /// `None` means "send everything in one batch".
    pub fn effective_batch_size(&self) -> Option<usize> {
        (self.batch_size > 0).then_some(self.batch_size)
    }

    /// Expiry cutoff for a given `now`, or `None` when retention is unbounded.
    pub fn retention_cutoff(&self, now_ms: i64) -> Option<i64> {
        if self.retention_days == 0 {
            return None;
        }
        Some(now_ms - i64::from(self.retention_days) * MS_PER_DAY)
    }

    /// Whether any upload can happen at all under this configuration.
    pub fn uploads_enabled(&self) -> bool {
        self.upload_logs
    }

    /// Whether the idle subscription must be running.
    pub fn wants_idle_subscription(&self) -> bool {
        self.uploads_enabled() && self.strategy == UploadStrategy::Idle
    }

    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        if self.upload_logs && self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
            out.push(ConfigWarning::MissingEndpoint);
        }
        if self.upload_logs && self.strategy == UploadStrategy::Idle && self.batch_size == 0 {
            out.push(ConfigWarning::UnboundedBatch);
        }
        out
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
