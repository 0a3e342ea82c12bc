use super::backoff::FlushBackoff;
use super::batch::UploadBatch;
use super::buffer::EventBuffer;
use super::config::PipelineConfig;
use super::stats::{Diagnostics, LiveState, PipelineCounters, PipelinePhase, PipelineStats};
use super::stored_queue::StoredQueue;
use crate::delivery::{ConnectionKind, Delivery, DeliveryError};
use crate::domain::Event;
use crate::storage::PersistentStore;
use crate::timer::{TimerHandle, TimerRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const FLUSH_TIMER_LABEL: &str = "event-pipeline.flush";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InProgress,
    /// Inside the backoff window; the value is the time left.
    Backoff(Duration),
    Offline(ConnectionKind),
    Stopped,
}

/// What one flush cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing pending in the buffer or the stored queue.
    Idle,
    Skipped(SkipReason),
    Delivered {
        events: usize,
        from_store: usize,
        status_code: u16,
    },
    /// Retryable failure; the batch is back in the stored queue.
    Requeued {
        events: usize,
        reason: String,
        retry_in: Duration,
    },
    /// The collector refused the batch for good.
    Discarded {
        events: usize,
        status_code: Option<u16>,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub persisted: usize,
    pub lost: usize,
    pub trimmed: usize,
    pub already_stopped: bool,
}

struct PipelineState {
    phase: PipelinePhase,
    buffer: EventBuffer,
    flush_timer: Option<TimerHandle>,
    backoff: FlushBackoff,
}

struct Shared {
    config: PipelineConfig,
    delivery: Arc<dyn Delivery>,
    store: PersistentStore,
    stored: StoredQueue,
    timers: TimerRegistry,
    state: Mutex<PipelineState>,
    flush_guard: tokio::sync::Mutex<()>,
    next_sequence: AtomicU64,
    counters: PipelineCounters,
}

/// Buffers events in memory, persists the ones that could not be delivered,
/// and ships batches to the collector on a repeating timer.
///
/// `enqueue` never blocks on I/O and never fails. One flush runs at a time;
/// a flush triggered while another is running is skipped. Writes to the
/// stored queue key happen only under the flush guard.
///
/// The first `enqueue` arms a timer on the registry. Outside a tokio runtime
/// events are still buffered but the timer stays unarmed until an `enqueue`
/// or `resume` runs inside one.
#[derive(Clone)]
pub struct EventPipeline {
    shared: Arc<Shared>,
}

impl EventPipeline {
    pub fn new(
        config: PipelineConfig,
        store: PersistentStore,
        delivery: Arc<dyn Delivery>,
        timers: TimerRegistry,
    ) -> Self {
        let stored = StoredQueue::new(
            store.clone(),
            config.storage_key.clone(),
            config.stored_queue_max_events,
        );
        let state = PipelineState {
            phase: PipelinePhase::Idle,
            buffer: EventBuffer::new(config.buffer_byte_ceiling, config.buffer_max_items),
            flush_timer: None,
            backoff: FlushBackoff::new(config.backoff.clone()),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                delivery,
                store,
                stored,
                timers,
                state: Mutex::new(state),
                flush_guard: tokio::sync::Mutex::new(()),
                next_sequence: AtomicU64::new(0),
                counters: PipelineCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Stamp and buffer one event. Returns its sequence, or `None` once stopped.
    pub fn enqueue(&self, event_type: impl Into<String>, payload: Value) -> Option<u64> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if state.phase == PipelinePhase::Stopped {
            PipelineCounters::incr(&shared.counters.rejected);
            debug!("Pipeline stopped, rejecting event");
            return None;
        }

        let sequence = shared.next_sequence.fetch_add(1, Ordering::SeqCst);
        let evicted = state.buffer.push(Event::new(event_type, payload, sequence));
        PipelineCounters::incr(&shared.counters.enqueued);

        if !evicted.is_empty() {
            PipelineCounters::add(&shared.counters.evicted, evicted.len());
            warn!(
                "Buffer over ceiling, evicted {} oldest events ({})",
                evicted.len(),
                describe_sequences(&evicted)
            );
        }

        if state.phase == PipelinePhase::Idle {
            state.phase = PipelinePhase::Accumulating;
        }
        self.arm_flush_timer(&mut state);

        Some(sequence)
    }

    /// Run one flush cycle.
    pub async fn flush(&self) -> FlushOutcome {
        let shared = &self.shared;

        let Ok(_guard) = shared.flush_guard.try_lock() else {
            PipelineCounters::incr(&shared.counters.skipped_in_progress);
            debug!("Flush already in progress, skipping");
            return FlushOutcome::Skipped(SkipReason::InProgress);
        };

        let gate = {
            let state = shared.state.lock();
            if state.phase == PipelinePhase::Stopped {
                Some(SkipReason::Stopped)
            } else {
                state.backoff.remaining(Instant::now()).map(SkipReason::Backoff)
            }
        };
        if let Some(reason) = gate {
            if let SkipReason::Backoff(remaining) = reason {
                PipelineCounters::incr(&shared.counters.skipped_backoff);
                debug!("Backing off, {:?} until the next attempt", remaining);
            }
            return FlushOutcome::Skipped(reason);
        }

        let stored = self.load_stored().await;

        {
            let mut state = shared.state.lock();
            if stored.is_empty() && state.buffer.is_empty() {
                if state.phase == PipelinePhase::Accumulating {
                    state.phase = PipelinePhase::Idle;
                    self.disarm_flush_timer(&mut state);
                }
                return FlushOutcome::Idle;
            }
        }

        if shared.config.check_connectivity {
            let connectivity = shared.delivery.check_connectivity().await;
            if !connectivity.is_connected {
                PipelineCounters::incr(&shared.counters.skipped_offline);
                info!(
                    "Collector not reachable ({:?}), skipping this flush",
                    connectivity.kind
                );
                return FlushOutcome::Skipped(SkipReason::Offline(connectivity.kind));
            }
        }

        let batch = {
            let mut state = shared.state.lock();
            if state.phase != PipelinePhase::Stopped {
                state.phase = PipelinePhase::Flushing;
            }
            UploadBatch::assemble(&stored, &mut state.buffer, shared.config.batch_limits())
        };

        let outcome = if batch.is_empty() {
            FlushOutcome::Idle
        } else {
            debug!(
                "Uploading batch {} with {} events ({} bytes, {} from stored queue)",
                batch.id(),
                batch.len(),
                batch.bytes(),
                batch.from_store()
            );

            match shared.delivery.upload(&shared.config.endpoint, batch.events()).await {
                Ok(receipt) => self.on_delivered(&batch, &stored, receipt.status_code).await,
                Err(e) if e.is_retryable() => self.on_retryable(&batch, stored.len(), &e).await,
                Err(e) => self.on_terminal(&batch, &stored, &e).await,
            }
        };

        {
            let mut state = shared.state.lock();
            if state.phase == PipelinePhase::Flushing {
                state.phase = PipelinePhase::Accumulating;
            }
        }

        outcome
    }

    async fn on_delivered(&self, batch: &UploadBatch, stored: &[Event], status_code: u16) -> FlushOutcome {
        let shared = &self.shared;

        if batch.from_store() > 0 && !shared.stored.replace(&stored[batch.from_store()..]).await {
            warn!(
                "Batch {} was delivered but is still in the stored queue and will be sent again",
                batch.id()
            );
        }

        PipelineCounters::add(&shared.counters.delivered_events, batch.len());
        PipelineCounters::incr(&shared.counters.delivered_batches);
        shared.state.lock().backoff.reset();

        debug!("Batch {} delivered ({})", batch.id(), describe_sequences(batch.events()));
        FlushOutcome::Delivered {
            events: batch.len(),
            from_store: batch.from_store(),
            status_code,
        }
    }

    async fn on_retryable(&self, batch: &UploadBatch, stored_len: usize, error: &DeliveryError) -> FlushOutcome {
        let shared = &self.shared;
        let buffered = batch.buffered();

        // The stored prefix never left the store, so only buffered events go back
        let appended = shared.stored.append(buffered, stored_len).await;
        PipelineCounters::add(&shared.counters.stored_evicted, appended.trimmed);

        if !appended.persisted {
            let evicted = shared.state.lock().buffer.restore_front(buffered.to_vec());
            warn!(
                "Could not persist {} events for retry, returned them to the buffer",
                buffered.len()
            );
            if !evicted.is_empty() {
                PipelineCounters::add(&shared.counters.evicted, evicted.len());
                warn!(
                    "Buffer over ceiling, evicted {} oldest events ({})",
                    evicted.len(),
                    describe_sequences(&evicted)
                );
            }
        }

        PipelineCounters::add(&shared.counters.requeued_events, batch.len());
        PipelineCounters::incr(&shared.counters.requeued_batches);
        let retry_in = shared.state.lock().backoff.record_failure(Instant::now());

        error!(
            "Batch {} of {} events failed ({}), requeued; retry after {:?} at the earliest",
            batch.id(),
            batch.len(),
            error,
            retry_in
        );
        FlushOutcome::Requeued {
            events: batch.len(),
            reason: error.to_string(),
            retry_in,
        }
    }

    async fn on_terminal(&self, batch: &UploadBatch, stored: &[Event], error: &DeliveryError) -> FlushOutcome {
        let shared = &self.shared;

        if batch.from_store() > 0 && !shared.stored.replace(&stored[batch.from_store()..]).await {
            warn!(
                "Rejected batch {} could not be removed from the stored queue",
                batch.id()
            );
        }

        PipelineCounters::add(&shared.counters.discarded_events, batch.len());
        PipelineCounters::incr(&shared.counters.discarded_batches);
        shared.state.lock().backoff.reset();

        error!(
            "Collector rejected batch {} of {} events ({}), discarding ({})",
            batch.id(),
            batch.len(),
            error,
            describe_sequences(batch.events())
        );
        FlushOutcome::Discarded {
            events: batch.len(),
            status_code: error.status_code(),
            reason: error.to_string(),
        }
    }

    /// Pick up whatever a previous session left in the stored queue.
    ///
    /// Moves the sequence counter past every stored or recorded sequence and
    /// arms the flush timer when events are pending. Returns the stored count.
    pub async fn resume(&self) -> usize {
        let shared = &self.shared;

        let _guard = shared.flush_guard.lock().await;
        let cursor = shared.store.get::<u64>(&shared.config.cursor_key()).await;
        let stored = self.load_stored().await;

        let after_stored = stored.iter().map(|e| e.sequence() + 1).max();
        if let Some(next) = cursor.into_iter().chain(after_stored).max() {
            shared.next_sequence.fetch_max(next, Ordering::SeqCst);
        }

        let pending = stored.len();
        if pending > 0 {
            let mut state = shared.state.lock();
            if state.phase == PipelinePhase::Idle {
                state.phase = PipelinePhase::Accumulating;
            }
            self.arm_flush_timer(&mut state);
        }

        info!(
            "Resumed with {} stored events, next sequence {}",
            pending,
            shared.next_sequence.load(Ordering::SeqCst)
        );
        pending
    }

    /// Stop the pipeline without touching the network.
    ///
    /// Cancels the flush timer, waits for an in-flight flush, and appends the
    /// remaining buffer to the stored queue. Later calls report `already_stopped`.
    pub async fn shutdown(&self) -> ShutdownReport {
        let shared = &self.shared;

        {
            let mut state = shared.state.lock();
            if state.phase == PipelinePhase::Stopped {
                return ShutdownReport {
                    already_stopped: true,
                    ..ShutdownReport::default()
                };
            }
            state.phase = PipelinePhase::Stopped;
            self.disarm_flush_timer(&mut state);
        }

        let _guard = shared.flush_guard.lock().await;
        let remaining = shared.state.lock().buffer.drain_all();
        let mut report = ShutdownReport::default();

        if !remaining.is_empty() {
            let stored_len = self.load_stored().await.len();
            let appended = shared.stored.append(&remaining, stored_len).await;

            if appended.persisted {
                report.persisted = remaining.len();
                report.trimmed = appended.trimmed;
                PipelineCounters::add(&shared.counters.stored_evicted, appended.trimmed);
            } else {
                report.lost = remaining.len();
                PipelineCounters::add(&shared.counters.lost_on_shutdown, remaining.len());
                error!(
                    "Could not persist {} buffered events during shutdown ({})",
                    remaining.len(),
                    describe_sequences(&remaining)
                );
            }
        }

        let next_sequence = shared.next_sequence.load(Ordering::SeqCst);
        shared.store.set(&shared.config.cursor_key(), &next_sequence).await;

        info!(
            "Event pipeline stopped: {} events persisted, {} lost",
            report.persisted, report.lost
        );
        report
    }

    pub fn stats(&self) -> PipelineStats {
        let shared = &self.shared;
        let live = {
            let state = shared.state.lock();
            LiveState {
                phase: state.phase,
                buffered_events: state.buffer.len(),
                buffered_bytes: state.buffer.bytes(),
                next_sequence: shared.next_sequence.load(Ordering::SeqCst),
                flush_timer_armed: state.flush_timer.is_some(),
                consecutive_failures: state.backoff.consecutive_failures(),
            }
        };

        PipelineStats::collect(live, &shared.counters)
    }

    /// Events currently waiting in the stored queue, oldest first.
    pub async fn stored_events(&self) -> Vec<Event> {
        self.shared.stored.load().await.events
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let shared = &self.shared;
        let stored_events = shared.stored.load().await.events.len();

        Diagnostics {
            pipeline: self.stats(),
            stored_events,
            timers: shared.timers.stats(),
            storage: shared.store.info().await,
            delivery: shared.delivery.stats(),
        }
    }

    /// Load the stored queue, writing it back once if records had to be
    /// upgraded or dropped. Callers hold the flush guard.
    async fn load_stored(&self) -> Vec<Event> {
        let shared = &self.shared;
        let migration = shared.stored.load().await;

        if (migration.dropped > 0 || migration.migrated > 0)
            && shared.stored.replace(&migration.events).await
        {
            PipelineCounters::add(&shared.counters.corrupt_records_dropped, migration.dropped);
        }

        migration.events
    }

    fn arm_flush_timer(&self, state: &mut PipelineState) {
        if state.flush_timer.is_some() || state.phase == PipelinePhase::Stopped {
            return;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime available, flush timer not armed");
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        let handle = self.shared.timers.schedule_repeating(
            FLUSH_TIMER_LABEL,
            self.shared.config.flush_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        let outcome = EventPipeline { shared }.flush().await;
                        debug!("Scheduled flush finished: {:?}", outcome);
                    }
                    Ok(())
                }
            },
        );

        state.flush_timer = Some(handle);
    }

    fn disarm_flush_timer(&self, state: &mut PipelineState) {
        if let Some(handle) = state.flush_timer.take() {
            self.shared.timers.cancel(&handle);
        }
    }
}

fn describe_sequences(events: &[Event]) -> String {
    match (events.first(), events.last()) {
        (Some(first), Some(last)) => format!("sequences {}..={}", first.sequence(), last.sequence()),
        _ => "no events".to_string(),
    }
}
