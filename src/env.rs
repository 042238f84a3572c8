/// Environment variable names used by this crate for convenient
/// configuration of the relay from services.
///
/// These are purely helpers; the core types remain decoupled from
/// environment access.

/// Set to `false` / `0` to keep records local and never upload.
pub const LOG_RELAY_UPLOAD_ENV: &str = "LOG_RELAY_UPLOAD";

/// Collector URL receiving `{"logs": [...], "uploadTime": ...}` POSTs.
pub const LOG_RELAY_ENDPOINT_ENV: &str = "LOG_RELAY_ENDPOINT";

/// `idle` or `immediate`.
pub const LOG_RELAY_STRATEGY_ENV: &str = "LOG_RELAY_STRATEGY";

/// Records per request in idle sweeps, `0` for unbounded.
pub const LOG_RELAY_BATCH_SIZE_ENV: &str = "LOG_RELAY_BATCH_SIZE";

/// Retention in days, `0` keeps records forever.
pub const LOG_RELAY_RETENTION_DAYS_ENV: &str = "LOG_RELAY_RETENTION_DAYS";

/// Quiet period before an idle sweep, in milliseconds.
pub const LOG_RELAY_IDLE_MS_ENV: &str = "LOG_RELAY_IDLE_MS";

/// Directory of the sled database.
pub const LOG_RELAY_STORE_PATH_ENV: &str = "LOG_RELAY_STORE_PATH";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable if it is set and non-empty.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
