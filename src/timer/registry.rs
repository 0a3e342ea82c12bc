use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Shortest repeating interval accepted; tokio rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    Once,
    Repeating,
}

/// Opaque reference to a scheduled callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    id: TimerId,
    kind: TimerKind,
    label: Arc<str>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveTimers {
    pub once: usize,
    pub repeating: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    pub active: ActiveTimers,
    pub created_total: u64,
    pub cancelled_total: u64,
    pub fired_once_total: u64,
    pub callback_failures: u64,
    /// `created_total - cancelled_total - fired_once_total`. Diagnostic only.
    pub leaked: u64,
}

struct TimerEntry {
    kind: TimerKind,
    label: Arc<str>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    timers: Mutex<HashMap<TimerId, TimerEntry>>,
    next_id: AtomicU64,
    created_total: AtomicU64,
    cancelled_total: AtomicU64,
    fired_once_total: AtomicU64,
    callback_failures: AtomicU64,
}

impl RegistryInner {
    /// Run one callback body; failures and panics are logged and counted, never propagated.
    async fn run_guarded<Fut>(&self, label: &str, body: Fut)
    where
        Fut: Future<Output = anyhow::Result<()>>,
    {
        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.callback_failures.fetch_add(1, Ordering::Relaxed);
                error!("Timer '{}' callback failed: {:#}", label, e);
            }
            Err(panic) => {
                self.callback_failures.fetch_add(1, Ordering::Relaxed);
                error!("Timer '{}' callback panicked: {}", label, panic_message(panic.as_ref()));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Tracks every delayed and periodic callback its owner schedules.
///
/// Callbacks run as tokio tasks, so scheduling must happen inside a runtime.
/// Cancelling never interrupts a body that is already running; it only
/// prevents later executions. Clones share the same registry.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    inner: Arc<RegistryInner>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, label: String, kind: TimerKind) -> (TimerHandle, CancellationToken) {
        let id = TimerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let label: Arc<str> = Arc::from(label);
        let cancel = CancellationToken::new();

        self.inner.timers.lock().insert(
            id,
            TimerEntry {
                kind,
                label: label.clone(),
                cancel: cancel.clone(),
            },
        );
        self.inner.created_total.fetch_add(1, Ordering::Relaxed);

        debug!("Scheduled {:?} timer '{}' ({:?})", kind, label, id);
        (TimerHandle { id, kind, label }, cancel)
    }

    /// Run `callback` once after `delay`.
    ///
    /// The handle leaves the active set immediately before the callback runs.
    pub fn schedule_once<F, Fut>(
        &self,
        label: impl Into<String>,
        delay: Duration,
        callback: F,
    ) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (handle, cancel) = self.register(label.into(), TimerKind::Once);
        let inner = self.inner.clone();
        let id = handle.id;
        let label = handle.label.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            // Lost a race with cancel()
            if inner.timers.lock().remove(&id).is_none() {
                return;
            }
            inner.fired_once_total.fetch_add(1, Ordering::Relaxed);

            inner.run_guarded(&label, async move { callback().await }).await;
        });

        handle
    }

    /// Run `callback` every `interval`, first after one full interval.
    ///
    /// Each body completes before the next tick is awaited; late ticks are
    /// delayed rather than bursted.
    pub fn schedule_repeating<F, Fut>(
        &self,
        label: impl Into<String>,
        interval: Duration,
        mut callback: F,
    ) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (handle, cancel) = self.register(label.into(), TimerKind::Repeating);
        let inner = self.inner.clone();
        let label = handle.label.clone();
        let period = interval.max(MIN_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                inner.run_guarded(&label, async { callback().await }).await;
            }
        });

        handle
    }

    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        let Some(entry) = self.inner.timers.lock().remove(&handle.id) else {
            return false;
        };

        entry.cancel.cancel();
        self.inner.cancelled_total.fetch_add(1, Ordering::Relaxed);
        debug!("Cancelled timer '{}'", entry.label);
        true
    }

    /// Cancel every active timer. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TimerEntry> = self.inner.timers.lock().drain().map(|(_, e)| e).collect();

        for entry in &drained {
            entry.cancel.cancel();
        }
        self.inner
            .cancelled_total
            .fetch_add(drained.len() as u64, Ordering::Relaxed);

        if !drained.is_empty() {
            debug!("Cancelled {} timers", drained.len());
        }
        drained.len()
    }

    pub fn is_active(&self, handle: &TimerHandle) -> bool {
        self.inner.timers.lock().contains_key(&handle.id)
    }

    /// Labels of active timers, sorted.
    pub fn active_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .inner
            .timers
            .lock()
            .values()
            .map(|entry| entry.label.to_string())
            .collect();
        labels.sort();
        labels
    }

    pub fn stats(&self) -> TimerStats {
        let mut active = ActiveTimers::default();
        for entry in self.inner.timers.lock().values() {
            match entry.kind {
                TimerKind::Once => active.once += 1,
                TimerKind::Repeating => active.repeating += 1,
            }
        }
        active.total = active.once + active.repeating;

        let created_total = self.inner.created_total.load(Ordering::Relaxed);
        let cancelled_total = self.inner.cancelled_total.load(Ordering::Relaxed);
        let fired_once_total = self.inner.fired_once_total.load(Ordering::Relaxed);

        TimerStats {
            active,
            created_total,
            cancelled_total,
            fired_once_total,
            callback_failures: self.inner.callback_failures.load(Ordering::Relaxed),
            leaked: created_total.saturating_sub(cancelled_total + fired_once_total),
        }
    }
}
