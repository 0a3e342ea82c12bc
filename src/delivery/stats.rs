// Lock-free delivery statistics using atomic operations

use super::DeliveryError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct DeliveryStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    timeouts: AtomicU64,
    network_errors: AtomicU64,
    bytes_sent: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Point-in-time copy of `DeliveryStats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub timeouts: u64,
    pub network_errors: u64,
    pub bytes_sent: u64,
    pub average_latency_ms: u64,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, bytes: usize, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &DeliveryError, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);

        let counter = match error {
            DeliveryError::Client { .. } | DeliveryError::Serialization(_) => &self.client_errors,
            DeliveryError::Server { .. } => &self.server_errors,
            DeliveryError::Timeout(_) => &self.timeouts,
            DeliveryError::Network(_) | DeliveryError::InvalidConfiguration(_) => {
                &self.network_errors
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);

        DeliverySnapshot {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            average_latency_ms: total_latency_ms.checked_div(total_requests).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_outcome() {
        let stats = DeliveryStats::new();

        stats.record_success(100, Duration::from_millis(20));
        stats.record_failure(
            &DeliveryError::Server {
                status: 502,
                message: String::new(),
            },
            Duration::from_millis(40),
        );
        stats.record_failure(&DeliveryError::Timeout(Duration::from_secs(1)), Duration::ZERO);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.server_errors, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.average_latency_ms, 20);
    }
}
