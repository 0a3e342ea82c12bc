use std::time::Duration;
use thiserror::Error;

/// Classified failure of one upload attempt.
///
/// The variant decides retry eligibility: only `Client` and `Serialization`
/// describe a batch that can never succeed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Collector rejected batch: HTTP {status} - {message}")]
    Client { status: u16, message: String },
    #[error("Collector failed: HTTP {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Server { .. }
            | DeliveryError::Timeout(_)
            | DeliveryError::Network(_)
            | DeliveryError::InvalidConfiguration(_) => true,
            DeliveryError::Client { .. } | DeliveryError::Serialization(_) => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::Client { status, .. } | DeliveryError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Client { .. } => "client_error",
            DeliveryError::Server { .. } => "server_error",
            DeliveryError::Timeout(_) => "timeout",
            DeliveryError::Network(_) => "network_error",
            DeliveryError::InvalidConfiguration(_) => "invalid_configuration",
            DeliveryError::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let client = DeliveryError::Client {
            status: 400,
            message: "bad".to_string(),
        };
        let server = DeliveryError::Server {
            status: 503,
            message: "busy".to_string(),
        };

        assert!(!client.is_retryable());
        assert!(server.is_retryable());
        assert!(DeliveryError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(DeliveryError::Network("refused".to_string()).is_retryable());

        assert_eq!(client.status_code(), Some(400));
        assert_eq!(server.status_code(), Some(503));
        assert_eq!(DeliveryError::Network(String::new()).status_code(), None);
        assert_eq!(server.kind(), "server_error");
    }
}
