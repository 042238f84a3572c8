//! Decides when buffered records go to the remote collector.
//!
//! Records are always persisted first. Under [`UploadStrategy::Immediate`]
//! each new record is then sent on its own; under [`UploadStrategy::Idle`]
//! an [`IdleSignal`] triggers a sweep that sends every pending record in
//! sequential batches. A single in-flight flag guarantees that at most one
//! upload (single record or sweep) runs at any time. Triggers that find the
//! flag set are dropped, not queued: the next trigger re-reads the store, so
//! nothing is lost, only deferred.

use crate::backend::{default_sink_builder, SinkBuilder};
use crate::config::{UploadConfig, UploadStrategy};
use crate::idle::{ActivityHandle, IdleCallback, IdleSignal};
use crate::record::LogRecord;
use crate::sink::RemoteSink;
use crate::store::LogStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, warn};

/// Why an upload attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another upload was already running.
    InFlight,
    /// `upload_logs` is off.
    Disabled,
    /// The coordinator was torn down.
    TornDown,
    /// Running without a store, so there is nothing to sweep.
    NoStore,
}

/// Outcome of one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReport {
    Skipped(SkipReason),
    /// Every batch was accepted. `batches == 0` means nothing was pending.
    Completed { batches: usize, uploaded: usize },
    /// A batch (or the store read) failed; later batches were not attempted.
    Failed { batches: usize, uploaded: usize, pending: usize },
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadReport::Completed { .. })
    }
}

/// RAII form of the in-flight flag; clearing happens on drop so success,
/// failure and panics all release it.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Settings {
    config: UploadConfig,
    sink: Arc<dyn RemoteSink>,
}

struct Inner {
    store: Option<Arc<dyn LogStore>>,
    sink_builder: SinkBuilder,
    settings: Mutex<Settings>,
    /// Present while an idle subscription is active. Always locked before
    /// `settings`.
    idle: Mutex<Option<IdleSignal>>,
    activity: ActivityHandle,
    in_flight: AtomicBool,
    started: AtomicBool,
    torn_down: AtomicBool,
}

/// Owns the upload strategy and the single in-flight guard.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
}

impl UploadCoordinator {
    /// Coordinator sending through the default sink for `config`
    /// (see [`make_sink`](crate::backend::make_sink)).
    ///
    /// `store == None` is the degraded mode used when storage could not be
    /// opened: records are never persisted and only immediate sends happen.
    pub fn new(config: UploadConfig, store: Option<Arc<dyn LogStore>>) -> Self {
        Self::with_sink_builder(config, store, default_sink_builder())
    }

    /// Coordinator that always sends through `sink`, whatever the endpoint.
    pub fn with_sink(config: UploadConfig, store: Option<Arc<dyn LogStore>>, sink: Arc<dyn RemoteSink>) -> Self {
        Self::with_sink_builder(config, store, Arc::new(move |_: &UploadConfig| Arc::clone(&sink)))
    }

    pub fn with_sink_builder(config: UploadConfig, store: Option<Arc<dyn LogStore>>, sink_builder: SinkBuilder) -> Self {
        log_warnings(&config);
        let sink = sink_builder(&config);
        Self {
            inner: Arc::new(Inner {
                store,
                sink_builder,
                settings: Mutex::new(Settings { config, sink }),
                idle: Mutex::new(None),
                activity: ActivityHandle::new(),
                in_flight: AtomicBool::new(false),
                started: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register the idle subscription if the configuration asks for one.
    /// Idempotent. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut idle = self.inner.lock_idle();
        if self.inner.torn_down.load(Ordering::Acquire) {
            return;
        }
        self.inner.started.store(true, Ordering::Release);
        if idle.is_none() {
            let config = self.inner.config();
            *idle = self.inner.build_idle(&config);
        }
    }

    /// Persist a new record and, under the immediate strategy, try to send
    /// it right away. Never fails; problems are logged.
    pub async fn handle_new_record(&self, record: LogRecord) {
        let inner = &self.inner;
        if let Some(store) = &inner.store {
            if let Err(e) = store.save(&record).await {
                error!("failed to persist log record {}: {}", record.id, e);
            }
        }

        if inner.torn_down.load(Ordering::Acquire) {
            return;
        }
        let config = inner.config();
        if config.uploads_enabled() && config.strategy == UploadStrategy::Immediate {
            inner.upload_single(record).await;
        }
    }

    /// Run one sweep now regardless of strategy. Returns immediately with
    /// [`SkipReason::InFlight`] if an upload is already running.
    pub async fn force_upload(&self) -> UploadReport {
        self.inner.sweep().await
    }

    /// Delete records older than the retention period. No-op when retention
    /// is 0 or there is no store.
    ///
    /// **Returns** the number of purged records.
    pub async fn expire_now(&self) -> usize {
        self.inner.expire().await
    }

    /// Apply a new configuration.
    ///
    /// The sink is rebuilt for the next send; an upload already in flight
    /// keeps the sink it started with. The idle subscription is torn down
    /// and rebuilt when anything it depends on changed.
    pub fn reconfigure(&self, config: UploadConfig) {
        log_warnings(&config);
        let inner = &self.inner;
        let sink = (inner.sink_builder)(&config);

        let mut idle = inner.lock_idle();
        let previous = {
            let mut settings = inner.lock_settings();
            settings.sink = sink;
            std::mem::replace(&mut settings.config, config.clone())
        };

        let rebuild = previous.upload_logs != config.upload_logs
            || previous.strategy != config.strategy
            || previous.batch_size != config.batch_size
            || previous.idle_period != config.idle_period;
        if !rebuild {
            return;
        }
        debug!("upload strategy changed from {} to {}", previous.strategy, config.strategy);

        if let Some(old) = idle.take() {
            old.teardown();
        }
        if inner.started.load(Ordering::Acquire) && !inner.torn_down.load(Ordering::Acquire) {
            *idle = inner.build_idle(&config);
        }
    }

    /// Stop the idle signal and ignore all further triggers. An upload
    /// already in flight runs to completion.
    pub fn teardown(&self) {
        let mut idle = self.inner.lock_idle();
        self.inner.torn_down.store(true, Ordering::Release);
        if let Some(signal) = idle.take() {
            signal.teardown();
        }
    }

    /// Handle for reporting host activity; activity postpones idle sweeps.
    pub fn activity(&self) -> ActivityHandle {
        self.inner.activity.clone()
    }

    pub fn config(&self) -> UploadConfig {
        self.inner.config()
    }

    pub fn store(&self) -> Option<&Arc<dyn LogStore>> {
        self.inner.store.as_ref()
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_idle_subscribed(&self) -> bool {
        self.inner.lock_idle().as_ref().map_or(false, IdleSignal::is_subscribed)
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }
}

impl Inner {
    fn lock_settings(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_idle(&self) -> MutexGuard<'_, Option<IdleSignal>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn config(&self) -> UploadConfig {
        self.lock_settings().config.clone()
    }

    fn sink(&self) -> Arc<dyn RemoteSink> {
        Arc::clone(&self.lock_settings().sink)
    }

    fn build_idle(self: &Arc<Self>, config: &UploadConfig) -> Option<IdleSignal> {
        if !config.wants_idle_subscription() {
            return None;
        }
        let signal = IdleSignal::with_activity(config.effective_idle_period(), self.activity.clone());
        signal.subscribe(self.idle_callback());
        debug!("idle uploads armed every {:?}", signal.period());
        Some(signal)
    }

    /// The sweep runs in its own task, so tearing the idle signal down never
    /// cancels a batch mid-send.
    fn idle_callback(self: &Arc<Self>) -> IdleCallback {
        let weak: Weak<Inner> = Arc::downgrade(self);
        Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.torn_down.load(Ordering::Acquire) {
                return;
            }
            tokio::spawn(async move {
                inner.expire().await;
                let report = inner.sweep().await;
                if report.is_success() {
                    debug!("idle upload finished: {:?}", report);
                }
            });
        })
    }

    async fn upload_single(&self, record: LogRecord) -> UploadReport {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("upload in flight, record {} left for the next sweep", record.id);
            return UploadReport::Skipped(SkipReason::InFlight);
        };
        let sink = self.sink();

        let batch = [record];
        if !sink.send(&batch).await {
            return UploadReport::Failed { batches: 1, uploaded: 0, pending: 1 };
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.mark_uploaded(&[batch[0].id.clone()]).await {
                error!("log record {} uploaded but not marked: {}", batch[0].id, e);
            }
        }
        UploadReport::Completed { batches: 1, uploaded: 1 }
    }

    async fn sweep(&self) -> UploadReport {
        if self.torn_down.load(Ordering::Acquire) {
            return UploadReport::Skipped(SkipReason::TornDown);
        }
        let config = self.config();
        if !config.uploads_enabled() {
            return UploadReport::Skipped(SkipReason::Disabled);
        }
        let Some(store) = &self.store else {
            return UploadReport::Skipped(SkipReason::NoStore);
        };
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("upload in flight, sweep skipped");
            return UploadReport::Skipped(SkipReason::InFlight);
        };
        let sink = self.sink();

        let mut pending = match store.unuploaded_records().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("failed to read pending log records: {}", e);
                return UploadReport::Failed { batches: 0, uploaded: 0, pending: 0 };
            }
        };
        if pending.is_empty() {
            return UploadReport::Completed { batches: 0, uploaded: 0 };
        }
        pending.sort_by_key(|r| r.timestamp);

        let total = pending.len();
        let batch_size = config.effective_batch_size().unwrap_or(total);
        let mut batches = 0;
        let mut uploaded = 0;

        for batch in pending.chunks(batch_size) {
            batches += 1;
            if !sink.send(batch).await {
                warn!(
                    "log batch {} failed, {} records left for the next upload",
                    batches,
                    total - uploaded
                );
                return UploadReport::Failed { batches, uploaded, pending: total - uploaded };
            }
            let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
            if let Err(e) = store.mark_uploaded(&ids).await {
                error!("{} log records uploaded but not marked: {}", ids.len(), e);
            }
            uploaded += batch.len();
        }

        debug!("uploaded {} log records in {} batches", uploaded, batches);
        UploadReport::Completed { batches, uploaded }
    }

    async fn expire(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let Some(cutoff) = self.config().retention_cutoff(Utc::now().timestamp_millis()) else {
            return 0;
        };
        match store.expire_older_than(cutoff).await {
            Ok(purged) => {
                if purged > 0 {
                    debug!("purged {} expired log records", purged);
                }
                purged
            }
            Err(e) => {
                warn!("log retention sweep failed: {}", e);
                0
            }
        }
    }
}

fn log_warnings(config: &UploadConfig) {
    for warning in config.warnings() {
        warn!("{}", warning);
    }
}
