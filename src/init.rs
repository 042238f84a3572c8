use crate::config::UploadConfig;
use crate::coordinator::{UploadCoordinator, UploadReport};
use crate::layer::RecordLayer;
use crate::record::{LogLevel, LogRecord};
use crate::store::LogStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Entry point tying a [`LogStore`] and an [`UploadCoordinator`] together.
///
/// Logging calls never fail: if storage could not be opened the relay keeps
/// running without persistence, and every store or upload problem is
/// reported through `tracing` only.
#[derive(Clone)]
pub struct LogRelay {
    coordinator: UploadCoordinator,
}

impl LogRelay {
    /// Initialize `store`, purge expired records and start uploading
    /// according to `config`. Must be called from within a Tokio runtime.
    ///
    /// **Parameters**
    /// - `config`: resolved [`UploadConfig`].
    /// - `store`: durable store; `None` runs store-less from the start.
    pub async fn start(config: UploadConfig, store: Option<Arc<dyn LogStore>>) -> Self {
        let store = Self::init_store(store).await;
        Self::start_with(UploadCoordinator::new(config, store)).await
    }

    /// Like [`LogRelay::start`] with a coordinator built by the caller,
    /// e.g. one using a custom sink.
    pub async fn start_with(coordinator: UploadCoordinator) -> Self {
        coordinator.expire_now().await;
        coordinator.start();
        Self { coordinator }
    }

    /// Run [`LogStore::init`], dropping to store-less mode on failure.
    pub async fn init_store(store: Option<Arc<dyn LogStore>>) -> Option<Arc<dyn LogStore>> {
        let store = store?;
        match store.init().await {
            Ok(()) => Some(store),
            Err(e) => {
                warn!("{}; continuing without local persistence", e);
                None
            }
        }
    }

    /// Record one event. Resolves once the record is persisted (and, under
    /// the immediate strategy, once its upload attempt finished).
    pub async fn log(&self, level: LogLevel, title: impl Into<String>, data: BTreeMap<String, serde_json::Value>) {
        self.coordinator.handle_new_record(LogRecord::new(level, title, data)).await;
    }

    pub async fn info(&self, title: impl Into<String>, data: BTreeMap<String, serde_json::Value>) {
        self.log(LogLevel::Info, title, data).await;
    }

    pub async fn warn(&self, title: impl Into<String>, data: BTreeMap<String, serde_json::Value>) {
        self.log(LogLevel::Warn, title, data).await;
    }

    pub async fn error(&self, title: impl Into<String>, data: BTreeMap<String, serde_json::Value>) {
        self.log(LogLevel::Error, title, data).await;
    }

    pub async fn debug(&self, title: impl Into<String>, data: BTreeMap<String, serde_json::Value>) {
        self.log(LogLevel::Debug, title, data).await;
    }

    pub async fn trace(&self, title: impl Into<String>, data: BTreeMap<String, serde_json::Value>) {
        self.log(LogLevel::Trace, title, data).await;
    }

    pub async fn force_upload(&self) -> UploadReport {
        self.coordinator.force_upload().await
    }

    pub fn reconfigure(&self, config: UploadConfig) {
        self.coordinator.reconfigure(config);
    }

    /// Flush pending records once, then stop all further uploads.
    pub async fn shutdown(&self) -> UploadReport {
        let report = self.coordinator.force_upload().await;
        self.coordinator.teardown();
        report
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.coordinator
    }
}

/// Configuration of the `tracing` integration.
///
/// **Fields**
/// - `channel_buffer`: maximum number of [`LogRecord`]s queued before new
///   events are dropped.
/// - `min_level`: least severe level captured into the store.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   added on top of [`RecordLayer`] so events are also printed.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub min_level: tracing::Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            min_level: tracing::Level::INFO,
            enable_stdout: true,
        }
    }
}

/// Install a global `tracing` subscriber feeding every captured event into
/// `relay`.
///
/// **Returns** the handle of the background task forwarding records, or
/// the error from `set_global_default` if a subscriber is already set.
pub fn init_tracing_with_config(
    relay: &LogRelay,
    config: LayerConfig,
) -> Result<JoinHandle<()>, tracing::subscriber::SetGlobalDefaultError> {
    let (layer, handle) = RecordLayer::new(relay.coordinator.clone(), config.channel_buffer, config.min_level);

    // Two subscriber shapes because the fmt layer changes the type.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(handle)
}

/// [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(relay: &LogRelay) -> Result<JoinHandle<()>, tracing::subscriber::SetGlobalDefaultError> {
    init_tracing_with_config(relay, LayerConfig::default())
}
