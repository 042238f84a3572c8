use crate::error::SinkError;
use crate::record::{LogRecord, UploadPayload};
use crate::sink::RemoteSink;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Configuration for [`HttpSink`].
#[derive(Clone, Debug)]
pub struct HttpSinkConfig {
    /// Full collector URL receiving the POST, e.g. "http://127.0.0.1:8080/logs".
    /// `None` disables delivery: every batch fails without any I/O.
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

/// Remote sink posting `{"logs": [...], "uploadTime": ...}` as JSON.
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    config: HttpSinkConfig,
}

impl HttpSink {
    /// Construct a new sink instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`HttpSinkConfig`] with the collector URL and the
    ///   per-request timeout.
    pub fn new(config: HttpSinkConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build configured HTTP client, using defaults: {}", e);
                Client::new()
            });
        Self { client, config }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Deliver a batch and report the precise failure reason.
    ///
    /// **Returns**
    /// - `Ok(())` for any 2xx response.
    /// - `Err(SinkError::NoEndpoint)` without touching the network when no
    ///   endpoint is configured.
    /// - `Err(..)` for transport errors, timeouts and non-success statuses.
    pub async fn try_send(&self, batch: &[LogRecord]) -> Result<(), SinkError> {
        let Some(endpoint) = self.endpoint() else {
            return Err(SinkError::NoEndpoint);
        };

        let body = serde_json::to_vec(&UploadPayload::new(batch))?;
        let resp = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(SinkError::Status { status: status.as_u16(), body: text })
        }
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn send(&self, batch: &[LogRecord]) -> bool {
        match self.try_send(batch).await {
            Ok(()) => {
                debug!("uploaded {} log records", batch.len());
                true
            }
            Err(SinkError::NoEndpoint) => {
                warn!("{}; {} log records stay pending", SinkError::NoEndpoint, batch.len());
                false
            }
            Err(e) => {
                error!("log upload of {} records failed: {}", batch.len(), e);
                false
            }
        }
    }
}
