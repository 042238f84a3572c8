/// Failures of the local [`LogStore`](crate::store::LogStore).
///
/// Only [`LogStore::init`](crate::store::LogStore::init) is allowed to surface
/// one of these to the application; every other path logs and swallows it.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("log storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("log store used before init")]
    Uninitialized,

    #[error("log record {0} already exists")]
    DuplicateId(String),

    #[error("log store write failed: {0}")]
    WriteFailure(String),

    #[error("stored log record is corrupt: {0}")]
    Corrupt(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::WriteFailure(e.to_string())
    }
}

/// Reasons a batch upload failed. Collapsed to a single `false` at the
/// [`RemoteSink`](crate::sink::RemoteSink) boundary once logged.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("no upload endpoint configured")]
    NoEndpoint,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("collector responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to serialize upload payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Non-fatal configuration diagnostics.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    #[error("log upload is enabled but no endpoint is configured; records will be kept locally")]
    MissingEndpoint,

    #[error("batch size is 0; every pending record will be sent in a single request")]
    UnboundedBatch,
}
