use crate::coordinator::UploadCoordinator;
use crate::record::{LogLevel, LogRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Crates whose events are never captured: the relay's own diagnostics and
/// the transport stack underneath it would otherwise feed back into the store.
const IGNORED_CRATES: &[&str] = &["tracing_log_relay", "reqwest", "hyper", "h2", "rustls", "sled"];

/// Matches whole path segments, so `hyper::client` is ignored but
/// `hyperion::api` is not.
fn is_ignored_target(target: &str) -> bool {
    IGNORED_CRATES.iter().any(|krate| {
        target
            .strip_prefix(krate)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands them to an [`UploadCoordinator`] via a bounded channel and
/// background task.
///
/// Events at `min_level` or more severe are captured. The event message
/// becomes the record title, every other field goes into `data` along with
/// the event target. Persistence and upload never run on the application
/// thread.
///
/// The forwarding task handles one record at a time. Under the immediate
/// strategy that includes awaiting the upload, so a burst of more events
/// than the channel buffer holds while a send is outstanding overflows it;
/// overflowing events are dropped and counted in `dropped_events`.
pub struct RecordLayer {
    sender: mpsc::Sender<LogRecord>,
    min_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
}

impl RecordLayer {
    /// Create a new layer and spawn a background task that pulls
    /// [`LogRecord`]s from a bounded channel and passes them to
    /// [`UploadCoordinator::handle_new_record`] in arrival order.
    ///
    /// `buffer` is raised to at least 16.
    pub fn new(coordinator: UploadCoordinator, buffer: usize, min_level: Level) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                coordinator.handle_new_record(record).await;
            }
        });

        (Self {
            sender: tx,
            min_level,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }, handle)
    }
}

impl<S> Layer<S> for RecordLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.min_level {
            return;
        }
        if is_ignored_target(meta.target()) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        fields
            .entry("target".to_string())
            .or_insert_with(|| serde_json::Value::String(meta.target().to_string()));
        let title = message.unwrap_or_else(|| meta.name().to_string());
        let record = LogRecord::new(LogLevel::from(meta.level()), title, fields);

        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_e) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("log record channel full, dropping log record");
            }
        }
    }
}

use tracing::field::{Field, Visit};

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{UploadConfig, UploadStrategy};
    use crate::noop_sink::NoopSink;
    use crate::store::{LogStore, MemoryLogStore};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[tokio::test]
    async fn captures_events_as_records() {
        let store = Arc::new(MemoryLogStore::new());
        let cfg = UploadConfig { upload_logs: false, strategy: UploadStrategy::Idle, ..Default::default() };
        let coordinator =
            UploadCoordinator::with_sink(cfg, Some(store.clone() as Arc<dyn LogStore>), Arc::new(NoopSink));
        let (layer, handle) = RecordLayer::new(coordinator, 64, Level::INFO);
        let dropped = Arc::clone(&layer.dropped_events);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "checkout", order_id = 7, retry = true, "payment declined");
            tracing::debug!(target: "checkout", "too verbose to keep");
            tracing::warn!(target: "tracing_log_relay::coordinator", "own diagnostics");
        });
        // The subscriber (and with it the sender) is gone; the task drains and exits.
        handle.await.unwrap();

        let records = store.all_records().await.unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.level, LogLevel::Error);
        assert_eq!(r.title, "payment declined");
        assert_eq!(r.data["order_id"], serde_json::json!(7));
        assert_eq!(r.data["retry"], serde_json::json!(true));
        assert_eq!(r.data["target"], serde_json::json!("checkout"));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn look_alike_targets_are_captured() {
        let store = Arc::new(MemoryLogStore::new());
        let cfg = UploadConfig { upload_logs: false, ..Default::default() };
        let coordinator =
            UploadCoordinator::with_sink(cfg, Some(store.clone() as Arc<dyn LogStore>), Arc::new(NoopSink));
        let (layer, handle) = RecordLayer::new(coordinator, 64, Level::INFO);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "h2o_shop::checkout", "cart lost");
            tracing::error!(target: "hyperion::api", "upstream timeout");
            tracing::error!(target: "sledgehammer", "crash");
            tracing::error!(target: "hyper::client", "transport noise");
            tracing::error!(target: "sled", "transport noise");
        });
        handle.await.unwrap();

        let mut targets: Vec<String> = store
            .all_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.data["target"].as_str().unwrap_or_default().to_string())
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["h2o_shop::checkout", "hyperion::api", "sledgehammer"]);
    }

    #[test]
    fn ignored_targets_match_whole_segments() {
        assert!(is_ignored_target("tracing_log_relay"));
        assert!(is_ignored_target("tracing_log_relay::coordinator"));
        assert!(is_ignored_target("reqwest::connect"));
        assert!(!is_ignored_target("reqwesting"));
        assert!(!is_ignored_target("h2o_shop"));
        assert!(!is_ignored_target("checkout"));
    }
}
