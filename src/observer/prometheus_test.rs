#![allow(clippy::unwrap_used)]

use super::*;
use axum::{extract::Query, http::StatusCode, routing::get, Router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) const SAMPLE_100: &str =
    r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"100"]}]}}"#;

/// Prometheus stand-in on an ephemeral port
///
/// Records every `query` parameter and answers with `status` and `body`.
pub(crate) async fn stub_server(
    status: StatusCode,
    body: &'static str,
) -> (String, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let app = Router::new().route(
        "/api/v1/query",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let recorder = recorder.clone();
            async move {
                if let Some(q) = params.get("query") {
                    recorder.lock().unwrap().push(q.clone());
                }
                (status, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (address, seen)
}

#[test]
fn test_parse_response_with_data() {
    let body = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [{"metric": {}, "value": [1435781451.781, "5.2"]}]
        }
    }"#;
    assert_eq!(parse_instant_query(body).unwrap(), 5.2);
}

#[test]
fn test_parse_response_no_data() {
    let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
    assert!(matches!(parse_instant_query(body), Err(MetricsError::NoData)));
}

#[test]
fn test_parse_response_nan_is_no_data() {
    let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"NaN"]}]}}"#;
    assert!(matches!(parse_instant_query(body), Err(MetricsError::NoData)));
}

#[test]
fn test_parse_response_error_envelope() {
    let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 5"}"#;
    match parse_instant_query(body) {
        Err(MetricsError::QueryFailed(msg)) => assert_eq!(msg, "parse error at char 5"),
        other => panic!("expected QueryFailed, got {other:?}"),
    }
}

#[test]
fn test_parse_response_invalid_json_and_value() {
    assert!(matches!(
        parse_instant_query("not valid json"),
        Err(MetricsError::Parse(_))
    ));
    let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"abc"]}]}}"#;
    assert!(matches!(parse_instant_query(body), Err(MetricsError::Parse(_))));
}

#[test]
fn test_client_rejects_invalid_address() {
    let err = PrometheusClient::new("not a url", Duration::from_secs(1)).err().unwrap();
    assert!(matches!(err, MetricsError::InvalidAddress(_)));
}

#[tokio::test]
async fn test_client_sends_query_parameter() {
    let (address, seen) = stub_server(StatusCode::OK, SAMPLE_100).await;
    let client = PrometheusClient::new(&format!("{address}/"), Duration::from_secs(1)).unwrap();

    let value = client.query(r#"up{job="prometheus"}"#).await.unwrap();

    assert_eq!(value, 100.0);
    assert_eq!(seen.lock().unwrap().as_slice(), [r#"up{job="prometheus"}"#]);
    assert_eq!(client.address(), address);
}

#[tokio::test]
async fn test_client_surfaces_bad_query() {
    let (address, _) = stub_server(
        StatusCode::BAD_REQUEST,
        r#"{"status":"error","errorType":"bad_data","error":"unexpected end of input"}"#,
    )
    .await;
    let client = PrometheusClient::new(&address, Duration::from_secs(1)).unwrap();

    let err = client.query("sum(").await.unwrap_err();
    assert!(matches!(err, MetricsError::QueryFailed(_)));
}

#[tokio::test]
async fn test_client_surfaces_server_error() {
    let (address, _) = stub_server(StatusCode::SERVICE_UNAVAILABLE, "overloaded").await;
    let client = PrometheusClient::new(&address, Duration::from_secs(1)).unwrap();

    let err = client.query("up").await.unwrap_err();
    assert!(matches!(err, MetricsError::Http(msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_client_connection_failure() {
    // Bind and drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = PrometheusClient::new(&address, Duration::from_millis(500)).unwrap();
    assert!(matches!(client.query("up").await, Err(MetricsError::Http(_))));
}
