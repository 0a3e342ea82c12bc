pub mod client;
pub mod error;
pub mod stats;

pub use client::{DeliveryConfig, HttpDelivery};
pub use error::DeliveryError;
pub use stats::{DeliverySnapshot, DeliveryStats};

use crate::domain::Event;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Successful upload metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub success: bool,
    pub status_code: u16,
    /// Optional `message` field of the collector's JSON response.
    pub message: Option<String>,
    pub bytes_sent: usize,
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Online,
    Offline,
    Unknown,
}

/// Advisory reachability of the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connectivity {
    pub is_connected: bool,
    pub kind: ConnectionKind,
}

impl Connectivity {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            kind: ConnectionKind::Online,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            kind: ConnectionKind::Offline,
        }
    }

    pub fn unknown() -> Self {
        Self {
            is_connected: false,
            kind: ConnectionKind::Unknown,
        }
    }
}

/// Transport to the remote collector.
///
/// `upload` classifies every non-2xx outcome into a `DeliveryError` the caller
/// uses to decide retry eligibility. `check_connectivity` never fails.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn upload(&self, endpoint: &str, events: &[Event]) -> Result<UploadReceipt, DeliveryError>;

    async fn check_connectivity(&self) -> Connectivity;

    fn stats(&self) -> DeliverySnapshot {
        DeliverySnapshot::default()
    }
}
