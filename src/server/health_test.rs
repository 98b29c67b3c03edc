//! Tests for the probe and scrape endpoints

#![allow(clippy::unwrap_used)]

use super::health::*;
use super::metrics::create_metrics;
use super::shutdown::{shutdown_channel, ShutdownController};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    shutdown: ShutdownController,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

async fn start(readiness: ReadinessState) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (shutdown, signal) = shutdown_channel();
    let metrics = create_metrics().unwrap();
    metrics.record_status_write("SetStatusPhase", "success");

    let handle = tokio::spawn(serve(listener, readiness, metrics, signal));
    TestServer {
        base,
        shutdown,
        handle,
    }
}

async fn get(base: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("{base}{path}"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_healthz_returns_200() {
    let server = start(ReadinessState::new()).await;

    assert_eq!(get(&server.base, "/healthz").await.status(), 200);

    server.handle.abort();
}

#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    let readiness = ReadinessState::new();
    let server = start(readiness.clone()).await;

    assert_eq!(get(&server.base, "/readyz").await.status(), 503);
    readiness.set_ready();
    assert_eq!(get(&server.base, "/readyz").await.status(), 200);
    readiness.set_not_ready();
    assert_eq!(get(&server.base, "/readyz").await.status(), 503);

    server.handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text_format() {
    let server = start(ReadinessState::new()).await;

    let response = get(&server.base, "/metrics").await;
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = response.text().await.unwrap();
    assert!(body.contains(
        r#"serin_status_writes_total{operation="SetStatusPhase",result="success"} 1"#
    ));

    server.handle.abort();
}

#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let server = start(ReadinessState::new()).await;
    assert_eq!(get(&server.base, "/healthz").await.status(), 200);

    server.shutdown.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(2), server.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[test]
fn test_readiness_state_transitions() {
    let state = ReadinessState::new();
    assert!(!state.is_ready());

    state.set_ready();
    assert!(state.is_ready());

    // Clones share the flag
    let cloned = state.clone();
    state.set_not_ready();
    assert!(!cloned.is_ready());
}
