use crate::record::LogRecord;
use async_trait::async_trait;

/// Asynchronous destination for batches of [`LogRecord`]s.
///
/// Implementations transport a batch to a concrete collector (HTTP, a test
/// double, ...). There is no partial success: the whole batch was accepted
/// or it was not.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Attempt to deliver a non-empty, ordered batch.
    ///
    /// **Returns**
    /// - `true` if the collector accepted the entire batch.
    /// - `false` on any failure (no endpoint, transport error, non-success
    ///   status, serialization). Errors are logged by the implementation
    ///   and never propagated; the caller only needs to know whether the
    ///   records may be marked uploaded.
    ///
    /// Implementations must not retry on their own. The coordinator
    /// re-reads the store on its next trigger instead.
    async fn send(&self, batch: &[LogRecord]) -> bool;
}
