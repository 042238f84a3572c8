use crate::record::LogRecord;
use crate::sink::RemoteSink;
use async_trait::async_trait;

/// A sink that accepts every batch and drops it.
///
/// Useful for measuring the overhead of persistence and coordination
/// without any network I/O.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl RemoteSink for NoopSink {
    async fn send(&self, _batch: &[LogRecord]) -> bool {
        true
    }
}

/// A sink that rejects every batch without doing any I/O.
///
/// Built when the crate is compiled without an HTTP transport.
#[derive(Clone, Default)]
pub struct RejectingSink;

#[async_trait]
impl RemoteSink for RejectingSink {
    async fn send(&self, batch: &[LogRecord]) -> bool {
        tracing::warn!("no log transport available; {} log records stay pending", batch.len());
        false
    }
}
