#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use event_relay::delivery::{Connectivity, Delivery, DeliveryError, UploadReceipt};
use event_relay::pipeline::{BackoffConfig, BackoffStrategy, EventPipeline, PipelineConfig};
use event_relay::storage::{MemoryBackend, PersistentStore};
use event_relay::{Event, TimerRegistry};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Delivery double that answers uploads from a script and records every batch.
///
/// Once the script runs out every upload succeeds with 200.
pub struct ScriptedDelivery {
    script: Mutex<VecDeque<Result<UploadReceipt, DeliveryError>>>,
    uploads: Mutex<Vec<Vec<Event>>>,
    connectivity: Mutex<Connectivity>,
    pub gate: Arc<tokio::sync::Mutex<()>>,
    pub upload_started: Notify,
}

impl ScriptedDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            uploads: Mutex::new(Vec::new()),
            connectivity: Mutex::new(Connectivity::online()),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            upload_started: Notify::new(),
        })
    }

    pub fn respond(&self, result: Result<UploadReceipt, DeliveryError>) {
        self.script.lock().push_back(result);
    }

    pub fn respond_status(&self, status: u16) {
        let result = match status {
            200..=299 => Ok(receipt(status)),
            400..=499 => Err(DeliveryError::Client {
                status,
                message: "rejected".to_string(),
            }),
            _ => Err(DeliveryError::Server {
                status,
                message: "unavailable".to_string(),
            }),
        };
        self.respond(result);
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        *self.connectivity.lock() = connectivity;
    }

    pub fn uploads(&self) -> Vec<Vec<Event>> {
        self.uploads.lock().clone()
    }

    pub fn uploaded_sequences(&self) -> Vec<Vec<u64>> {
        self.uploads
            .lock()
            .iter()
            .map(|batch| batch.iter().map(Event::sequence).collect())
            .collect()
    }
}

#[async_trait]
impl Delivery for ScriptedDelivery {
    async fn upload(&self, _endpoint: &str, events: &[Event]) -> Result<UploadReceipt, DeliveryError> {
        self.upload_started.notify_one();
        let _open = self.gate.lock().await;

        self.uploads.lock().push(events.to_vec());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(receipt(200)))
    }

    async fn check_connectivity(&self) -> Connectivity {
        *self.connectivity.lock()
    }
}

pub fn receipt(status_code: u16) -> UploadReceipt {
    UploadReceipt {
        success: true,
        status_code,
        message: None,
        bytes_sent: 0,
        latency: Duration::ZERO,
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        flush_interval: FLUSH_INTERVAL,
        backoff: BackoffConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            strategy: BackoffStrategy::Exponential,
            jitter: false,
        },
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub pipeline: EventPipeline,
    pub delivery: Arc<ScriptedDelivery>,
    pub store: PersistentStore,
    pub timers: TimerRegistry,
}

pub fn harness(config: PipelineConfig) -> Harness {
    harness_with_store(
        config,
        PersistentStore::new(Arc::new(MemoryBackend::default())),
    )
}

pub fn harness_with_store(config: PipelineConfig, store: PersistentStore) -> Harness {
    let delivery = ScriptedDelivery::new();
    let timers = TimerRegistry::new();
    let pipeline = EventPipeline::new(config, store.clone(), delivery.clone(), timers.clone());

    Harness {
        pipeline,
        delivery,
        store,
        timers,
    }
}

pub fn fixed_event(sequence: u64) -> Event {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    Event::with_timestamp("tap", json!({"i": sequence}), ts, sequence)
}

/// Let the repeating flush timer fire once more.
pub async fn next_tick() {
    tokio::time::sleep(FLUSH_INTERVAL + Duration::from_millis(10)).await;
}
