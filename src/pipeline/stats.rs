use crate::delivery::DeliverySnapshot;
use crate::storage::StorageInfo;
use crate::timer::TimerStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Idle,
    Accumulating,
    Flushing,
    Stopped,
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub enqueued: AtomicU64,
    pub rejected: AtomicU64,
    pub evicted: AtomicU64,
    pub stored_evicted: AtomicU64,
    pub delivered_events: AtomicU64,
    pub delivered_batches: AtomicU64,
    pub requeued_events: AtomicU64,
    pub requeued_batches: AtomicU64,
    pub discarded_events: AtomicU64,
    pub discarded_batches: AtomicU64,
    pub skipped_in_progress: AtomicU64,
    pub skipped_backoff: AtomicU64,
    pub skipped_offline: AtomicU64,
    pub corrupt_records_dropped: AtomicU64,
    pub lost_on_shutdown: AtomicU64,
}

impl PipelineCounters {
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub phase: PipelinePhase,
    pub buffered_events: usize,
    pub buffered_bytes: usize,
    pub next_sequence: u64,
    pub flush_timer_armed: bool,
    pub consecutive_failures: u32,
    pub enqueued_total: u64,
    pub rejected_total: u64,
    pub evicted_total: u64,
    pub stored_evicted_total: u64,
    pub delivered_events_total: u64,
    pub delivered_batches_total: u64,
    pub requeued_events_total: u64,
    pub requeued_batches_total: u64,
    pub discarded_events_total: u64,
    pub discarded_batches_total: u64,
    pub skipped_in_progress_total: u64,
    pub skipped_backoff_total: u64,
    pub skipped_offline_total: u64,
    pub corrupt_records_dropped_total: u64,
    pub lost_on_shutdown_total: u64,
}

pub(crate) struct LiveState {
    pub phase: PipelinePhase,
    pub buffered_events: usize,
    pub buffered_bytes: usize,
    pub next_sequence: u64,
    pub flush_timer_armed: bool,
    pub consecutive_failures: u32,
}

impl PipelineStats {
    pub(crate) fn collect(live: LiveState, counters: &PipelineCounters) -> Self {
        use PipelineCounters as C;

        Self {
            phase: live.phase,
            buffered_events: live.buffered_events,
            buffered_bytes: live.buffered_bytes,
            next_sequence: live.next_sequence,
            flush_timer_armed: live.flush_timer_armed,
            consecutive_failures: live.consecutive_failures,
            enqueued_total: C::get(&counters.enqueued),
            rejected_total: C::get(&counters.rejected),
            evicted_total: C::get(&counters.evicted),
            stored_evicted_total: C::get(&counters.stored_evicted),
            delivered_events_total: C::get(&counters.delivered_events),
            delivered_batches_total: C::get(&counters.delivered_batches),
            requeued_events_total: C::get(&counters.requeued_events),
            requeued_batches_total: C::get(&counters.requeued_batches),
            discarded_events_total: C::get(&counters.discarded_events),
            discarded_batches_total: C::get(&counters.discarded_batches),
            skipped_in_progress_total: C::get(&counters.skipped_in_progress),
            skipped_backoff_total: C::get(&counters.skipped_backoff),
            skipped_offline_total: C::get(&counters.skipped_offline),
            corrupt_records_dropped_total: C::get(&counters.corrupt_records_dropped),
            lost_on_shutdown_total: C::get(&counters.lost_on_shutdown),
        }
    }
}

/// Everything an operator needs to judge the relay's health in one place.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub pipeline: PipelineStats,
    pub stored_events: usize,
    pub timers: TimerStats,
    pub storage: StorageInfo,
    pub delivery: DeliverySnapshot,
}
