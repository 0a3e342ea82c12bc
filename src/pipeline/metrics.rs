use super::stats::Diagnostics;
#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[cfg(feature = "metrics")]
struct Exposition {
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl Exposition {
    fn counter(&self, name: &str, help: &str, value: u64) -> Result<(), MetricsError> {
        let counter = IntCounter::with_opts(Opts::new(name, help))?;
        counter.inc_by(value);
        self.registry.register(Box::new(counter))?;
        Ok(())
    }

    fn gauge(&self, name: &str, help: &str, value: u64) -> Result<(), MetricsError> {
        let gauge = IntGauge::with_opts(Opts::new(name, help))?;
        gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
        self.registry.register(Box::new(gauge))?;
        Ok(())
    }
}

/// Render a diagnostics snapshot in the Prometheus text exposition format.
#[cfg(feature = "metrics")]
pub fn render_metrics(diagnostics: &Diagnostics) -> Result<String, MetricsError> {
    let out = Exposition {
        registry: Registry::new_custom(Some("event_relay".to_string()), None)?,
    };
    let pipeline = &diagnostics.pipeline;

    out.counter("events_enqueued_total", "Events accepted by enqueue", pipeline.enqueued_total)?;
    out.counter("events_rejected_total", "Events rejected after shutdown", pipeline.rejected_total)?;
    out.counter("events_evicted_total", "Events evicted from the in-memory buffer", pipeline.evicted_total)?;
    out.counter(
        "stored_events_evicted_total",
        "Events trimmed from the stored queue by retention",
        pipeline.stored_evicted_total,
    )?;
    out.counter("events_delivered_total", "Events acknowledged by the collector", pipeline.delivered_events_total)?;
    out.counter("batches_delivered_total", "Batches acknowledged by the collector", pipeline.delivered_batches_total)?;
    out.counter("events_requeued_total", "Events requeued after a retryable failure", pipeline.requeued_events_total)?;
    out.counter("events_discarded_total", "Events discarded after a client error", pipeline.discarded_events_total)?;
    out.counter("batches_discarded_total", "Batches discarded after a client error", pipeline.discarded_batches_total)?;
    out.counter("flush_skipped_offline_total", "Flushes skipped while offline", pipeline.skipped_offline_total)?;
    out.counter("flush_skipped_backoff_total", "Flushes skipped inside the backoff window", pipeline.skipped_backoff_total)?;
    out.counter(
        "flush_skipped_in_progress_total",
        "Flushes skipped because another was running",
        pipeline.skipped_in_progress_total,
    )?;
    out.counter(
        "corrupt_records_dropped_total",
        "Stored records that could not be decoded",
        pipeline.corrupt_records_dropped_total,
    )?;
    out.counter("events_lost_on_shutdown_total", "Buffered events lost at shutdown", pipeline.lost_on_shutdown_total)?;

    out.gauge("buffered_events", "Events in the in-memory buffer", pipeline.buffered_events as u64)?;
    out.gauge("buffered_bytes", "Serialized bytes in the in-memory buffer", pipeline.buffered_bytes as u64)?;
    out.gauge("stored_events", "Events waiting in the stored queue", diagnostics.stored_events as u64)?;
    out.gauge("consecutive_failures", "Consecutive retryable delivery failures", u64::from(pipeline.consecutive_failures))?;

    out.gauge("storage_used_bytes", "Bytes used across all storage keys", diagnostics.storage.current_size)?;
    out.gauge("storage_limit_bytes", "Storage quota in bytes", diagnostics.storage.limit_size)?;

    out.gauge("timers_active", "Active timers", diagnostics.timers.active.total as u64)?;
    out.gauge("timers_leaked", "Timers neither cancelled nor fired", diagnostics.timers.leaked)?;
    out.counter("timer_callback_failures_total", "Timer callbacks that failed or panicked", diagnostics.timers.callback_failures)?;

    let delivery = &diagnostics.delivery;
    out.counter("http_requests_total", "Upload requests sent", delivery.total_requests)?;
    out.counter("http_requests_succeeded_total", "Upload requests answered with 2xx", delivery.successful_requests)?;
    out.counter("http_timeouts_total", "Upload requests that timed out", delivery.timeouts)?;
    out.counter("http_bytes_sent_total", "Request body bytes sent", delivery.bytes_sent)?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&out.registry.gather(), &mut buffer)?;

    Ok(String::from_utf8_lossy(&buffer).to_string())
}

#[cfg(not(feature = "metrics"))]
pub fn render_metrics(_diagnostics: &Diagnostics) -> Result<String, MetricsError> {
    Ok("# Metrics disabled\n".to_string())
}
