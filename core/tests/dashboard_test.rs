//! Dashboard HTTP Tests
//!
//! Binds the router to an ephemeral port and drives it with reqwest:
//! - Monitor SSE endpoint (validation, headers, frames)
//! - Action endpoints (envelope shape, status codes)
//! - Health

mod common;

use cobra_core::dashboard::{DashboardConfig, DashboardServer};
use cobra_core::{ConnectionRegistry, MonitorBridge, MonitorConfig, RegistryConfig};
use common::FakeConnector;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};

struct TestServer {
    base: String,
    connector: Arc<FakeConnector>,
    registry: Arc<ConnectionRegistry>,
    client: reqwest::Client,
}

async fn start(connector: Arc<FakeConnector>) -> TestServer {
    let registry = Arc::new(ConnectionRegistry::new(
        connector.clone(),
        RegistryConfig::default(),
    ));
    let bridge = Arc::new(MonitorBridge::new(
        connector.clone(),
        MonitorConfig {
            keep_alive: Duration::from_secs(60),
            ..MonitorConfig::default()
        },
    ));
    let server = DashboardServer::new(DashboardConfig::default(), registry.clone(), bridge);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(server.serve_on(listener, std::future::pending()));

    TestServer {
        base,
        connector,
        registry,
        client: reqwest::Client::new(),
    }
}

fn profile() -> Value {
    json!({
        "id": "local",
        "name": "Local",
        "servers": ["nats://localhost:4222"],
        "authType": "none"
    })
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

/// Read SSE chunks until `needle` shows up, returning everything read so far
async fn read_until(response: &mut reqwest::Response, buffer: &mut String, needle: &str) {
    timeout(Duration::from_secs(2), async {
        while !buffer.contains(needle) {
            let chunk = response.chunk().await.unwrap().expect("stream still open");
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{needle:?} not received, got {buffer:?}"));
}

// =============================================================================
// Monitor endpoint
// =============================================================================

#[tokio::test]
async fn monitor_without_connection_id_is_rejected() {
    let server = start(FakeConnector::new()).await;

    let response = server
        .client
        .get(format!("{}/api/monitor?subject=orders.*", server.base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(response.text().await.unwrap(), "Missing connectionId");
    assert_eq!(server.connector.dial_count(), 0);
}

#[tokio::test]
async fn monitor_streams_connected_and_message_frames() {
    let server = start(FakeConnector::new()).await;

    let mut response = server
        .client
        .get(format!(
            "{}/api/monitor?connectionId=c1&subject=orders.*&servers=nats://a:4222,nats://b:4222",
            server.base
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let headers = response.headers();
    assert!(headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(headers["cache-control"], "no-cache");

    let mut buffer = String::new();
    read_until(&mut response, &mut buffer, "event: connected").await;
    read_until(&mut response, &mut buffer, r#"{"subject":"orders.*"}"#).await;

    let record = &server.connector.records()[0];
    assert_eq!(record.servers, vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()]);

    server.connector.connection(0).inject("orders.created", r#"{"id":1}"#);
    read_until(&mut response, &mut buffer, "event: message").await;
    read_until(&mut response, &mut buffer, r#""size":8"#).await;
    assert!(buffer.contains(r#""subject":"orders.created""#));
}

#[tokio::test]
async fn monitor_reports_unreachable_server_as_error_frame() {
    let server = start(FakeConnector::unreachable()).await;

    let mut response = server
        .client
        .get(format!("{}/api/monitor?connectionId=c1", server.base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let mut buffer = String::new();
    read_until(&mut response, &mut buffer, "event: error").await;
    assert!(!buffer.contains("event: connected"));
}

#[tokio::test]
async fn dropping_the_stream_closes_monitor_connection() {
    let server = start(FakeConnector::new()).await;

    let mut response = server
        .client
        .get(format!("{}/api/monitor?connectionId=c1&subject=orders.*", server.base))
        .send()
        .await
        .unwrap();
    let mut buffer = String::new();
    read_until(&mut response, &mut buffer, "event: connected").await;
    drop(response);

    let connection = server.connector.connection(0);
    for _ in 0..200 {
        if connection.close_count() == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(connection.close_count(), 1);
}

// =============================================================================
// Action endpoints
// =============================================================================

#[tokio::test]
async fn server_info_returns_success_envelope() {
    let server = start(FakeConnector::new()).await;

    let (status, body) = server
        .post("/api/connections/info", json!({ "connection": profile() }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["server_name"], "fake");
    assert!(server.registry.contains("local"));
}

#[tokio::test]
async fn unreachable_server_maps_to_bad_gateway() {
    let server = start(FakeConnector::unreachable()).await;

    let (status, body) = server
        .post("/api/connections/test", json!({ "connection": profile() }))
        .await;

    assert_eq!(status, 502);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("could not connect"));
}

#[tokio::test]
async fn invalid_stream_name_is_bad_request() {
    let server = start(FakeConnector::new()).await;

    let (status, body) = server
        .post(
            "/api/streams/create",
            json!({
                "connection": profile(),
                "config": { "name": "orders.v1", "subjects": ["orders.*"] }
            }),
        )
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(server.connector.dial_count(), 0);
}

#[tokio::test]
async fn kv_round_trip_over_http() {
    let server = start(FakeConnector::new()).await;

    let (status, _) = server
        .post(
            "/api/kv/create",
            json!({ "connection": profile(), "config": { "bucket": "profiles" } }),
        )
        .await;
    assert_eq!(status, 200);

    let (_, body) = server
        .post(
            "/api/kv/put",
            json!({ "connection": profile(), "bucket": "profiles", "key": "alice", "value": "v1" }),
        )
        .await;
    assert_eq!(body["data"], 1);

    let (_, body) = server
        .post(
            "/api/kv/get",
            json!({ "connection": profile(), "bucket": "profiles", "key": "alice" }),
        )
        .await;
    assert_eq!(body["data"]["value"], "v1");
    assert_eq!(body["data"]["operation"], "PUT");

    let (status, body) = server
        .post(
            "/api/kv/get",
            json!({ "connection": profile(), "bucket": "profiles", "key": "bob" }),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({ "success": false, "error": "Entry not found" }));
}

#[tokio::test]
async fn request_over_http_echoes_reply() {
    let server = start(FakeConnector::new()).await;

    let (status, body) = server
        .post(
            "/api/messages/request",
            json!({
                "connection": profile(),
                "subject": "svc.echo",
                "payload": "{\"q\": 1}",
                "timeoutMs": 100
            }),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["data"], r#"{"q":1}"#);
}

#[tokio::test]
async fn delete_connection_evicts_it() {
    let server = start(FakeConnector::new()).await;

    server
        .post("/api/connections/info", json!({ "connection": profile() }))
        .await;
    assert!(server.registry.contains("local"));

    let response = server
        .client
        .delete(format!("{}/api/connections/local", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(!server.registry.contains("local"));
}

#[tokio::test]
async fn health_reports_cached_connections() {
    let server = start(FakeConnector::new()).await;

    let body: Value = server
        .client
        .get(format!("{}/api/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "ok", "connections": 0 }));

    server
        .post("/api/connections/info", json!({ "connection": profile() }))
        .await;
    let body: Value = server
        .client
        .get(format!("{}/api/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connections"], 1);
}
