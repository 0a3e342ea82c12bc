use super::config::{ConfigError, RelayConfig, StorageKind};
use super::logging_system::LoggingError;
use crate::delivery::{Delivery, DeliveryError, HttpDelivery};
use crate::pipeline::{Diagnostics, EventPipeline, FlushOutcome, ShutdownReport, render_metrics};
use crate::storage::{FileBackend, MemoryBackend, PersistentStore, StorageBackend, StorageError};
use crate::timer::{TimerHandle, TimerRegistry};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

const DIAGNOSTICS_TIMER_LABEL: &str = "relay.diagnostics";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
}

/// One line of relay input.
#[derive(Debug, Deserialize)]
struct InputEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, alias = "data")]
    payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    EndOfInput,
    Signal,
    InputError,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stopped_by: StopCause,
    pub resumed: usize,
    pub lines: u64,
    pub accepted: u64,
    pub invalid: u64,
    pub drained: usize,
    pub shutdown: ShutdownReport,
    pub timers_cancelled: usize,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Default)]
struct InputTally {
    lines: u64,
    accepted: u64,
    invalid: u64,
}

pub async fn open_backend(config: &RelayConfig) -> Result<Arc<dyn StorageBackend>, ServiceError> {
    match config.storage_backend {
        StorageKind::File => Ok(Arc::new(FileBackend::new(config.file_backend_config()).await?)),
        StorageKind::Memory => Ok(Arc::new(MemoryBackend::new(config.storage_limit_bytes()))),
        #[cfg(feature = "disk-fallback")]
        StorageKind::Sled => Ok(Arc::new(crate::storage::SledBackend::open(
            config.storage_dir.join("sled"),
            config.storage_limit_bytes(),
        )?)),
        #[cfg(not(feature = "disk-fallback"))]
        StorageKind::Sled => Err(ServiceError::Unsupported(
            "the sled backend needs the disk-fallback feature".to_string(),
        )),
    }
}

/// Reads newline-delimited JSON events and feeds them through an `EventPipeline`.
pub struct RelayService {
    config: RelayConfig,
    pipeline: EventPipeline,
    timers: TimerRegistry,
}

impl RelayService {
    pub async fn new(config: RelayConfig) -> Result<Self, ServiceError> {
        let backend = open_backend(&config).await?;
        let delivery = Arc::new(HttpDelivery::new(config.delivery_config())?);
        Ok(Self::with_parts(config, backend, delivery))
    }

    pub fn with_parts(
        config: RelayConfig,
        backend: Arc<dyn StorageBackend>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        let timers = TimerRegistry::new();
        let pipeline = EventPipeline::new(
            config.pipeline_config(),
            PersistentStore::new(backend),
            delivery,
            timers.clone(),
        );

        Self {
            config,
            pipeline,
            timers,
        }
    }

    pub fn pipeline(&self) -> &EventPipeline {
        &self.pipeline
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Relay `input` until it ends or `shutdown` resolves, then stop cleanly.
    ///
    /// At end of input the pending events get one last round of flushes when
    /// `drain_on_exit` is set. A signal skips that and only persists.
    pub async fn run<R, S>(&self, input: R, shutdown: S) -> Result<RunSummary, ServiceError>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let resumed = self.pipeline.resume().await;
        let diagnostics_timer = self.schedule_diagnostics();

        let mut lines = input.lines();
        let mut tally = InputTally::default();
        tokio::pin!(shutdown);

        let stopped_by = loop {
            tokio::select! {
                () = &mut shutdown => break StopCause::Signal,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.ingest(&line, &mut tally),
                    Ok(None) => break StopCause::EndOfInput,
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break StopCause::InputError;
                    }
                },
            }
        };
        info!("Input stopped ({:?}) after {} lines", stopped_by, tally.lines);

        let drained = if stopped_by == StopCause::EndOfInput && self.config.drain_on_exit {
            self.drain().await
        } else {
            0
        };

        if let Some(handle) = diagnostics_timer {
            self.timers.cancel(&handle);
        }
        let shutdown = self.pipeline.shutdown().await;
        let timers_cancelled = self.timers.cancel_all();

        let diagnostics = self.pipeline.diagnostics().await;
        if let Err(e) = report(&diagnostics, self.config.metrics_file.as_deref()).await {
            warn!("Final diagnostics report failed: {:#}", e);
        }
        if diagnostics.timers.leaked > 0 {
            warn!("{} timers leaked", diagnostics.timers.leaked);
        }

        Ok(RunSummary {
            stopped_by,
            resumed,
            lines: tally.lines,
            accepted: tally.accepted,
            invalid: tally.invalid,
            drained,
            shutdown,
            timers_cancelled,
            diagnostics,
        })
    }

    fn ingest(&self, line: &str, tally: &mut InputTally) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        tally.lines += 1;

        match serde_json::from_str::<InputEvent>(line) {
            Ok(input) => {
                if self.pipeline.enqueue(input.event_type, input.payload).is_some() {
                    tally.accepted += 1;
                }
            }
            Err(e) => {
                tally.invalid += 1;
                warn!("Skipping malformed input line {}: {}", tally.lines, e);
            }
        }
    }

    /// Flush until nothing is left or a cycle makes no progress.
    async fn drain(&self) -> usize {
        let stats = self.pipeline.stats();
        let pending = stats.buffered_events + self.pipeline.stored_events().await.len();
        let mut delivered = 0;

        // Every productive cycle removes at least one event
        for _ in 0..pending {
            match self.pipeline.flush().await {
                FlushOutcome::Delivered { events, .. } => delivered += events,
                FlushOutcome::Discarded { .. } => {}
                outcome => {
                    debug!("Drain stopped: {:?}", outcome);
                    break;
                }
            }
        }

        if pending > 0 {
            info!("Drained {} of {} pending events before exit", delivered, pending);
        }
        delivered
    }

    fn schedule_diagnostics(&self) -> Option<TimerHandle> {
        if self.config.diagnostics_interval_secs == 0 {
            return None;
        }

        let pipeline = self.pipeline.clone();
        let metrics_file = self.config.metrics_file.clone();

        Some(self.timers.schedule_repeating(
            DIAGNOSTICS_TIMER_LABEL,
            Duration::from_secs(self.config.diagnostics_interval_secs),
            move || {
                let pipeline = pipeline.clone();
                let metrics_file = metrics_file.clone();
                async move {
                    let diagnostics = pipeline.diagnostics().await;
                    report(&diagnostics, metrics_file.as_deref()).await
                }
            },
        ))
    }
}

async fn report(diagnostics: &Diagnostics, metrics_file: Option<&Path>) -> anyhow::Result<()> {
    let pipeline = &diagnostics.pipeline;
    info!(
        "Relay diagnostics: phase={:?} buffered={} stored={} delivered={} requeued={} discarded={} evicted={} active_timers={} storage={}/{} bytes",
        pipeline.phase,
        pipeline.buffered_events,
        diagnostics.stored_events,
        pipeline.delivered_events_total,
        pipeline.requeued_events_total,
        pipeline.discarded_events_total,
        pipeline.evicted_total,
        diagnostics.timers.active.total,
        diagnostics.storage.current_size,
        diagnostics.storage.limit_size
    );
    debug!("Diagnostics detail: {}", serde_json::to_string(diagnostics)?);

    if let Some(path) = metrics_file {
        let text = render_metrics(diagnostics)?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    Ok(())
}
