use std::sync::Arc;

use crate::config::UploadConfig;
use crate::sink::RemoteSink;

/// Builds the sink used for a given configuration.
///
/// The coordinator calls it at construction and on every reconfiguration;
/// an upload already in flight keeps the sink it started with.
pub type SinkBuilder = Arc<dyn Fn(&UploadConfig) -> Arc<dyn RemoteSink> + Send + Sync>;

/// Create the default [`RemoteSink`] for an [`UploadConfig`].
///
/// With the `http` feature this is an [`HttpSink`](crate::http_sink::HttpSink)
/// pointed at `cfg.endpoint`. A missing endpoint still yields a sink; it
/// fails every batch without I/O so records stay pending.
pub fn make_sink(cfg: &UploadConfig) -> Arc<dyn RemoteSink> {
    #[cfg(feature = "http")]
    {
        use crate::http_sink::{HttpSink, HttpSinkConfig};

        let sink = HttpSink::new(HttpSinkConfig {
            endpoint: cfg.endpoint.clone(),
            timeout: cfg.request_timeout,
        });
        Arc::new(sink) as Arc<dyn RemoteSink>
    }

    #[cfg(not(feature = "http"))]
    {
        let _ = cfg; // silence unused warning when feature is disabled
        Arc::new(crate::noop_sink::RejectingSink) as Arc<dyn RemoteSink>
    }
}

/// The [`SinkBuilder`] wrapping [`make_sink`].
pub fn default_sink_builder() -> SinkBuilder {
    Arc::new(make_sink)
}
