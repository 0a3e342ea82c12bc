use chrono::{TimeZone, Utc};
use event_relay::delivery::{
    ConnectionKind, Connectivity, Delivery, DeliveryConfig, DeliveryError, HttpDelivery,
};
use event_relay::Event;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

fn events(range: std::ops::Range<u64>) -> Vec<Event> {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    range
        .map(|i| Event::with_timestamp("lesson_opened", json!({"lesson": i}), ts, i))
        .collect()
}

fn client_for(server: &MockServer) -> HttpDelivery {
    HttpDelivery::new(DeliveryConfig {
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

/// Address nothing listens on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn test_upload_success_posts_json_array() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/events"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"message": "queued"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let batch = events(0..3);
    let receipt = client.upload("events", &batch).await.unwrap();

    assert!(receipt.success);
    assert_eq!(receipt.status_code, 202);
    assert_eq!(receipt.message.as_deref(), Some("queued"));
    assert_eq!(receipt.bytes_sent, serde_json::to_vec(&batch).unwrap().len());

    let requests = mock_server.received_requests().await.unwrap();
    let sent: Vec<Event> = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent, batch);

    let stats = client.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
}

#[tokio::test]
async fn test_upload_sends_batch_and_configured_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/events"))
        .and(header("x-batch-size", "2"))
        .and(header("x-batch-sequence", "5-6"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut extra_headers = BTreeMap::new();
    extra_headers.insert("x-api-key".to_string(), "secret".to_string());
    let client = HttpDelivery::new(DeliveryConfig {
        base_url: format!("{}/v1", mock_server.uri()),
        extra_headers,
        ..Default::default()
    })
    .unwrap();

    let receipt = client.upload("events", &events(5..7)).await.unwrap();
    assert_eq!(receipt.status_code, 200);
    assert_eq!(receipt.message, None);
}

#[tokio::test]
async fn test_client_error_is_not_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "unknown event type"})))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let error = client.upload("events", &events(0..1)).await.unwrap_err();

    match &error {
        DeliveryError::Client { status, message } => {
            assert_eq!(*status, 400);
            assert_eq!(message, "unknown event type");
        }
        other => panic!("Expected client error, got {other:?}"),
    }
    assert!(!error.is_retryable());
    assert_eq!(client.stats().client_errors, 1);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let error = client.upload("events", &events(0..2)).await.unwrap_err();

    match &error {
        DeliveryError::Server { status, message } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("Expected server error, got {other:?}"),
    }
    assert!(error.is_retryable());
    assert_eq!(error.status_code(), Some(500));
    assert_eq!(client.stats().server_errors, 1);
}

#[tokio::test]
async fn test_slow_collector_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let client = HttpDelivery::new(DeliveryConfig {
        base_url: mock_server.uri(),
        request_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    let error = client.upload("events", &events(0..1)).await.unwrap_err();
    assert!(matches!(error, DeliveryError::Timeout(_)), "got {error:?}");
    assert!(error.is_retryable());
    assert_eq!(client.stats().timeouts, 1);
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let client = HttpDelivery::new(DeliveryConfig {
        base_url: closed_port_url(),
        connection_timeout: Duration::from_secs(1),
        ..Default::default()
    })
    .unwrap();

    let error = client.upload("events", &events(0..1)).await.unwrap_err();
    assert!(matches!(error, DeliveryError::Network(_)), "got {error:?}");
    assert!(error.is_retryable());
    assert_eq!(client.stats().network_errors, 1);
}

#[tokio::test]
async fn test_connectivity_online_for_any_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let connectivity = client.check_connectivity().await;

    assert!(connectivity.is_connected);
    assert_eq!(connectivity.kind, ConnectionKind::Online);
}

#[tokio::test]
async fn test_connectivity_offline_when_refused() {
    let client = HttpDelivery::new(DeliveryConfig {
        base_url: closed_port_url(),
        probe_timeout: Duration::from_secs(2),
        ..Default::default()
    })
    .unwrap();

    let connectivity = client.check_connectivity().await;
    assert!(!connectivity.is_connected);
    assert_eq!(connectivity.kind, ConnectionKind::Offline);
}

#[tokio::test]
async fn test_connectivity_unknown_when_health_check_stalls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let client = HttpDelivery::new(DeliveryConfig {
        base_url: mock_server.uri(),
        probe_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    let connectivity = client.check_connectivity().await;
    assert_eq!(connectivity, Connectivity::unknown());
    assert!(!connectivity.is_connected);
}
