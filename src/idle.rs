//! Quiet-period detection driving batched uploads.
//!
//! An [`IdleSignal`] owns one timer task. Hosts report activity through an
//! [`ActivityHandle`]; every report restarts the quiet period. When a full
//! period passes without activity the registered callback runs, and the
//! timer starts over. A host that never reports activity therefore gets a
//! plain recurring timer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

/// Callback invoked when the quiet period elapses. Must not block; spawn
/// any real work.
pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;

/// Cloneable handle used to report activity to an [`IdleSignal`].
#[derive(Clone, Default)]
pub struct ActivityHandle {
    notify: Arc<Notify>,
}

impl ActivityHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity, restarting the quiet period.
    pub fn touch(&self) {
        self.notify.notify_one();
    }
}

/// Single-subscriber idle timer with an explicit lifecycle.
pub struct IdleSignal {
    period: Duration,
    activity: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdleSignal {
    pub fn new(period: Duration) -> Self {
        Self::with_activity(period, ActivityHandle::new())
    }

    /// Signal listening on an existing handle, so hosts keep reporting to the
    /// same handle when the signal is rebuilt.
    pub fn with_activity(period: Duration, activity: ActivityHandle) -> Self {
        Self {
            period,
            activity: activity.notify,
            task: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn activity(&self) -> ActivityHandle {
        ActivityHandle { notify: Arc::clone(&self.activity) }
    }

    /// Register `callback`, replacing any previous one, and (re)start the
    /// timer. Must be called from within a Tokio runtime.
    pub fn subscribe(&self, callback: IdleCallback) {
        let mut task = self.lock_task();
        if let Some(old) = task.take() {
            old.abort();
        }
        let period = self.period;
        let activity = Arc::clone(&self.activity);
        *task = Some(tokio::spawn(run(period, activity, callback)));
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock_task().as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Cancel the timer and drop the callback. No callback runs afterwards.
    pub fn teardown(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for IdleSignal {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run(period: Duration, activity: Arc<Notify>, callback: IdleCallback) {
    loop {
        tokio::select! {
            _ = activity.notified() => {
                trace!("activity observed, idle timer reset");
            }
            _ = sleep(period) => {
                trace!("idle for {:?}", period);
                callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, IdleCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_quiet_period_without_activity() {
        let signal = IdleSignal::new(Duration::from_millis(100));
        let (count, cb) = counter();
        signal.subscribe(cb);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_restarts_the_quiet_period() {
        let signal = IdleSignal::new(Duration::from_millis(100));
        let activity = signal.activity();
        let (count, cb) = counter();
        signal.subscribe(cb);

        sleep(Duration::from_millis(60)).await;
        activity.touch();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "timer should have been reset");

        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_replaces_previous_callback() {
        let signal = IdleSignal::new(Duration::from_millis(100));
        let (first, cb1) = counter();
        let (second, cb2) = counter();
        signal.subscribe(cb1);
        signal.subscribe(cb2);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_callbacks() {
        let signal = IdleSignal::new(Duration::from_millis(100));
        let (count, cb) = counter();
        signal.subscribe(cb);
        assert!(signal.is_subscribed());

        signal.teardown();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!signal.is_subscribed());
    }
}
