//! Client Integration Tests
//!
//! Each test runs a scripted mock server on loopback that reads raw frames
//! and answers (or misbehaves) exactly as the test needs. They verify:
//! - Successful calls and remote error envelopes
//! - Health tracking after partial header and body reads, and draining
//! - Skipping late complete responses to abandoned calls
//! - Connection closing on write failures, oversize frames and peer close

use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use trpc_client::{Client, ClientConfig, HealthState};
use trpc_common::transport::{Codec, BUF_SIZE};
use trpc_common::{Endpoint, ErrorObject, Request, Response, TrpcError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serves one connection with `script` and returns the listening endpoint.
async fn mock_server<F, Fut>(script: F) -> Endpoint
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::try_from(listener.local_addr().unwrap()).unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(stream).await;
    });
    endpoint
}

async fn read_request(stream: &mut TcpStream) -> Request {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn frame(response: &Response) -> Vec<u8> {
    Codec::new().encode_frame(response).unwrap()
}

async fn reply(stream: &mut TcpStream, response: &Response) {
    stream.write_all(&frame(response)).await.unwrap();
}

/// Answers every request: `add` sums its params, anything else echoes them.
async fn answer(stream: &mut TcpStream) {
    let request = read_request(stream).await;
    let result = if request.method == "add" {
        json!(request.params.iter().filter_map(Value::as_i64).sum::<i64>())
    } else {
        Value::Array(request.params.clone())
    };
    reply(stream, &Response::success(request.id, result)).await;
}

fn client_config(timeout_ms: u64) -> ClientConfig {
    ClientConfig::new().with_timeout(Duration::from_millis(timeout_ms))
}

async fn connect(endpoint: Endpoint, timeout_ms: u64) -> Client {
    let mut client = Client::with_config(client_config(timeout_ms));
    assert!(client.connect(endpoint).await);
    client
}

#[tokio::test]
async fn test_call_success() {
    let endpoint = mock_server(|mut stream| async move {
        answer(&mut stream).await;
        answer(&mut stream).await;
    })
    .await;

    let mut client = Client::make(endpoint).await.unwrap();
    assert_eq!(client.peer_addr().unwrap(), endpoint);

    let sum: Option<i64> = client.call("add", (1, 2)).await;
    assert_eq!(sum, Some(3));

    let echoed: Option<(String, bool)> = client.call("echo", ("x", true)).await;
    assert_eq!(echoed, Some(("x".to_string(), true)));
}

#[tokio::test]
async fn test_tokens_increase_per_call() {
    let endpoint = mock_server(|mut stream| async move {
        for expected in 1..=3u64 {
            let request = read_request(&mut stream).await;
            assert_eq!(request.id, expected);
            assert_eq!(request.version, "2.0");
            reply(&mut stream, &Response::success(request.id, json!(expected))).await;
        }
    })
    .await;

    let mut client = connect(endpoint, 1000).await;
    for expected in 1..=3u64 {
        let id: Option<u64> = client.call("id", ()).await;
        assert_eq!(id, Some(expected));
    }
}

#[tokio::test]
async fn test_remote_error() {
    let endpoint = mock_server(|mut stream| async move {
        for _ in 0..2 {
            let request = read_request(&mut stream).await;
            let error = ErrorObject {
                code: -32601,
                message: Some(format!("Method not found: {}", request.method)),
            };
            reply(&mut stream, &Response::failure(request.id, error)).await;
        }
    })
    .await;

    let mut client = connect(endpoint, 1000).await;

    let result: Option<i64> = client.call("sub", (1, 2)).await;
    assert!(result.is_none());
    match client.error() {
        Some(TrpcError::Remote { code, message }) => {
            assert_eq!(code, -32601);
            assert_eq!(message.as_deref(), Some("Method not found: sub"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    // application errors keep the connection
    assert!(client.is_connected());
    let result = client.try_call::<i64, _>("mul", (1, 2)).await;
    assert!(matches!(result, Err(TrpcError::Remote { code: -32601, .. })));
}

#[tokio::test]
async fn test_result_type_mismatch_keeps_connection() {
    let endpoint = mock_server(|mut stream| async move {
        let request = read_request(&mut stream).await;
        reply(&mut stream, &Response::success(request.id, json!("three"))).await;
        answer(&mut stream).await;
    })
    .await;

    let mut client = connect(endpoint, 1000).await;

    let sum: Option<i64> = client.call("add", (1, 2)).await;
    assert!(sum.is_none());
    assert!(matches!(client.error(), Some(TrpcError::Json(_))));

    let sum: Option<i64> = client.call("add", (1, 2)).await;
    assert_eq!(sum, Some(3));
}

#[tokio::test]
async fn test_lost_response_then_recovery() {
    let endpoint = mock_server(|mut stream| async move {
        // the first request is never answered
        let _ = read_request(&mut stream).await;
        answer(&mut stream).await;
    })
    .await;

    let mut client = connect(endpoint, 200).await;

    let sum: Option<i64> = client.call("add", (1, 2)).await;
    assert!(sum.is_none());
    assert!(matches!(client.error(), Some(TrpcError::Timeout { transferred: 0 })));
    assert_eq!(client.health().state(), HealthState::NoRead);
    assert!(client.is_connected());

    let sum: Option<i64> = client.call("add", (2, 3)).await;
    assert_eq!(sum, Some(5));
}

#[tokio::test]
async fn test_partial_header_is_drained() {
    let endpoint = mock_server(|mut stream| async move {
        let request = read_request(&mut stream).await;
        let stale = frame(&Response::success(request.id, json!("stale")));
        stream.write_all(&stale[..2]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        stream.write_all(&stale[2..]).await.unwrap();

        answer(&mut stream).await;
    })
    .await;

    let mut client = connect(endpoint, 150).await;

    let lost: Option<String> = client.call("slow", ()).await;
    assert!(lost.is_none());
    assert!(matches!(client.error(), Some(TrpcError::Timeout { transferred: 2 })));
    assert_eq!(client.health().state(), HealthState::HeaderReadSome);
    assert_eq!(client.health().some(), 2);

    // let the rest of the stale frame arrive
    tokio::time::sleep(Duration::from_millis(400)).await;

    let sum: Option<i64> = client.call("add", (20, 22)).await;
    assert_eq!(sum, Some(42));
    assert_eq!(client.health().state(), HealthState::NoRead);
}

#[tokio::test]
async fn test_partial_body_is_drained() {
    let endpoint = mock_server(|mut stream| async move {
        let request = read_request(&mut stream).await;
        let stale = frame(&Response::success(request.id, json!("a long enough stale result")));
        stream.write_all(&stale[..10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        stream.write_all(&stale[10..]).await.unwrap();

        answer(&mut stream).await;
    })
    .await;

    let mut client = connect(endpoint, 150).await;

    let lost: Option<String> = client.call("slow", ()).await;
    assert!(lost.is_none());
    assert_eq!(client.health().state(), HealthState::ContentReadSome);
    assert_eq!(client.health().some(), 6);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let sum: Option<i64> = client.call("add", (1, 1)).await;
    assert_eq!(sum, Some(2));
    assert_eq!(client.health().state(), HealthState::NoRead);
}

#[tokio::test]
async fn test_late_complete_response_is_skipped() {
    let endpoint = mock_server(|mut stream| async move {
        let first = read_request(&mut stream).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        reply(&mut stream, &Response::success(first.id, json!(-1))).await;

        answer(&mut stream).await;
    })
    .await;

    let mut client = connect(endpoint, 150).await;

    let lost: Option<i64> = client.call("add", (1, 2)).await;
    assert!(lost.is_none());
    assert_eq!(client.health().state(), HealthState::NoRead);

    let sum: Option<i64> = client.call("add", (3, 4)).await;
    assert_eq!(sum, Some(7));
}

#[tokio::test]
async fn test_future_token_is_mismatch() {
    let endpoint = mock_server(|mut stream| async move {
        let request = read_request(&mut stream).await;
        reply(&mut stream, &Response::success(request.id + 5, json!(0))).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    })
    .await;

    let mut client = connect(endpoint, 1000).await;

    let result = client.try_call::<i64, _>("add", (1, 2)).await;
    assert!(matches!(
        result,
        Err(TrpcError::TokenMismatch { expected: 1, received: 6 })
    ));
}

#[tokio::test]
async fn test_oversize_response_closes_connection() {
    let endpoint = mock_server(|mut stream| async move {
        let _ = read_request(&mut stream).await;
        let declared = (BUF_SIZE - 4 + 1) as u32;
        stream.write_all(&declared.to_be_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    })
    .await;

    let mut client = connect(endpoint, 1000).await;

    let result = client.try_call::<Value, _>("big", ()).await;
    assert!(matches!(result, Err(TrpcError::FrameTooLarge { .. })));
    assert!(!client.is_connected());

    let again: Option<Value> = client.call("big", ()).await;
    assert!(again.is_none());
    assert!(matches!(client.error(), Some(TrpcError::NotConnected)));
}

#[tokio::test]
async fn test_body_write_failure_closes_connection() {
    let endpoint = mock_server(|stream| async move {
        // accept, never read
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(stream);
    })
    .await;

    let mut client = connect(endpoint, 200).await;

    let huge = "x".repeat(64 * 1024 * 1024);
    let result: Option<Value> = client.call("store", (huge,)).await;
    assert!(result.is_none());
    match client.error() {
        Some(TrpcError::Timeout { transferred }) => assert!(transferred > 0),
        other => panic!("expected a partial write timeout, got {:?}", other),
    }
    assert!(!client.is_connected());

    let again: Option<Value> = client.call("store", ("small",)).await;
    assert!(again.is_none());
    assert!(matches!(client.error(), Some(TrpcError::NotConnected)));
}

#[tokio::test]
async fn test_peer_close_while_reading_closes_connection() {
    let endpoint = mock_server(|mut stream| async move {
        let _ = read_request(&mut stream).await;
        drop(stream);
    })
    .await;

    let mut client = connect(endpoint, 1000).await;

    let result: Option<i64> = client.call("add", (1, 2)).await;
    assert!(result.is_none());
    assert!(matches!(client.error(), Some(TrpcError::PeerClosed { transferred: 0 })));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_failed_drain_makes_client_unhealthy() {
    let endpoint = mock_server(|mut stream| async move {
        let request = read_request(&mut stream).await;
        let stale = frame(&Response::success(request.id, json!(3)));
        stream.write_all(&stale[..2]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(stream);
    })
    .await;

    let mut client = connect(endpoint, 150).await;

    let lost: Option<i64> = client.call("add", (1, 2)).await;
    assert!(lost.is_none());
    assert_eq!(client.health().state(), HealthState::HeaderReadSome);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let result: Option<i64> = client.call("add", (1, 2)).await;
    assert!(result.is_none());
    assert!(matches!(client.error(), Some(TrpcError::Unhealthy)));
    assert_eq!(client.health().state(), HealthState::Undefined);

    client.close();
    assert!(!client.is_connected());
}
