//! gRPC Streaming Integration Tests
//!
//! Tests the full path from an upstream page read to a gRPC client stream.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tonic::transport::{Channel, Server};
use tonic::{Code, Request};

use common::{Calls, ScriptedSource, fast_config};
use price_feed_proxy::{
    FeedKey, PriceFeedServer, PriceFeedServerConfig, SessionRegistry,
    proto::{
        GetStatusRequest, SessionState, SubscribeRequest,
        price_feed_service_client::PriceFeedServiceClient,
        price_feed_service_server::PriceFeedServiceServer,
    },
};

const WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    client: PriceFeedServiceClient<Channel>,
    registry: SessionRegistry,
    calls: Arc<Calls>,
    handle: tokio::task::JoinHandle<()>,
}

/// Start a test gRPC server on a random port and return a connected client.
async fn setup_test_server(source: ScriptedSource) -> TestServer {
    let calls = source.calls();
    let registry = SessionRegistry::new(Arc::new(source), fast_config());

    let config = PriceFeedServerConfig {
        version: "test-0.0.1".to_string(),
        ..PriceFeedServerConfig::default()
    };
    let server = PriceFeedServer::new(config, registry.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(PriceFeedServiceServer::new(server))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = PriceFeedServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    TestServer {
        client,
        registry,
        calls,
        handle,
    }
}

fn subscribe_request(exchange: &str, ticker: &str) -> Request<SubscribeRequest> {
    Request::new(SubscribeRequest {
        ticker: ticker.to_string(),
        exchange: exchange.to_string(),
    })
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Subscribe Tests
// =============================================================================

#[tokio::test]
async fn test_subscribe_streams_price_updates() {
    let mut server = setup_test_server(ScriptedSource::steady(50_000.0)).await;

    let mut stream = server
        .client
        .subscribe(subscribe_request("BINANCE", "BTCUSD"))
        .await
        .unwrap()
        .into_inner();

    let update = timeout(WAIT, stream.message())
        .await
        .expect("timeout waiting for update")
        .expect("stream error")
        .expect("no message");

    assert_eq!(update.ticker, "BTCUSD");
    assert_eq!(update.exchange, "BINANCE");
    assert_eq!(update.price, 50_000.0);
    assert!(update.observed_at_ms > 0);

    server.handle.abort();
}

#[tokio::test]
async fn test_subscribe_normalizes_key_and_defaults_exchange() {
    let mut server = setup_test_server(ScriptedSource::steady(3_000.0)).await;

    let mut stream = server
        .client
        .subscribe(subscribe_request("", "  ethusd "))
        .await
        .unwrap()
        .into_inner();

    let update = timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(update.ticker, "ETHUSD");
    assert_eq!(update.exchange, "BINANCE");

    server.handle.abort();
}

#[tokio::test]
async fn test_two_clients_share_one_session() {
    let server = setup_test_server(
        ScriptedSource::steady(3_000.0).with_open_delay(Duration::from_millis(50)),
    )
    .await;
    let mut first_client = server.client.clone();
    let mut second_client = server.client.clone();

    let (first, second) = tokio::join!(
        first_client.subscribe(subscribe_request("BINANCE", "ETHUSD")),
        second_client.subscribe(subscribe_request("binance", "ethusd")),
    );
    let mut first = first.unwrap().into_inner();
    let mut second = second.unwrap().into_inner();

    let a = timeout(WAIT, first.message()).await.unwrap().unwrap().unwrap();
    let b = timeout(WAIT, second.message()).await.unwrap().unwrap().unwrap();

    assert_eq!(a.price, b.price);
    assert_eq!(server.calls.opens(), 1);
    assert_eq!(server.registry.session_count(), 1);

    server.handle.abort();
}

#[tokio::test]
async fn test_subscribe_rejects_blank_ticker() {
    let mut server = setup_test_server(ScriptedSource::steady(1.0)).await;

    let status = server
        .client
        .subscribe(subscribe_request("BINANCE", "  "))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(server.calls.opens(), 0);

    server.handle.abort();
}

#[tokio::test]
async fn test_subscribe_unavailable_when_source_fails() {
    let mut server = setup_test_server(ScriptedSource::steady(1.0).failing_opens(1)).await;

    let status = server
        .client
        .subscribe(subscribe_request("BINANCE", "ZZZ"))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unavailable);
    assert!(status.message().contains("BINANCE:ZZZ"));
    assert_eq!(server.registry.session_count(), 0);

    // A retry starts from scratch and succeeds
    let mut stream = server
        .client
        .subscribe(subscribe_request("BINANCE", "ZZZ"))
        .await
        .unwrap()
        .into_inner();
    assert!(timeout(WAIT, stream.message()).await.unwrap().unwrap().is_some());
    assert_eq!(server.calls.opens(), 2);

    server.handle.abort();
}

#[tokio::test]
async fn test_failing_reads_keep_stream_open() {
    let mut server = setup_test_server(ScriptedSource::always_failing_reads()).await;

    let mut stream = server
        .client
        .subscribe(subscribe_request("BINANCE", "FAKECOIN"))
        .await
        .unwrap()
        .into_inner();

    let waited = timeout(Duration::from_millis(200), stream.message()).await;
    assert!(waited.is_err(), "stream should stay open without messages");
    assert!(server.calls.reads() >= 2);

    server.handle.abort();
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_client_disconnect_releases_session() {
    let mut server = setup_test_server(ScriptedSource::steady(1.0)).await;
    let key = FeedKey::normalize("BINANCE", "BTCUSD", "BINANCE").unwrap();

    let mut stream = server
        .client
        .subscribe(subscribe_request("BINANCE", "BTCUSD"))
        .await
        .unwrap()
        .into_inner();
    timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(server.registry.subscriber_count(&key), 1);

    drop(stream);

    let registry = server.registry.clone();
    eventually(move || !registry.contains(&key)).await;
    let calls = Arc::clone(&server.calls);
    eventually(move || calls.closes() == 1).await;

    server.handle.abort();
}

#[tokio::test]
async fn test_registry_shutdown_ends_streams_with_unavailable() {
    let mut server = setup_test_server(ScriptedSource::steady(1.0)).await;

    let mut stream = server
        .client
        .subscribe(subscribe_request("BINANCE", "BTCUSD"))
        .await
        .unwrap()
        .into_inner();
    timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();

    timeout(WAIT, server.registry.shutdown()).await.unwrap();

    let status = loop {
        match timeout(WAIT, stream.message()).await.unwrap() {
            Ok(Some(_)) => {}
            Ok(None) => panic!("stream ended without status"),
            Err(status) => break status,
        }
    };
    assert_eq!(status.code(), Code::Unavailable);

    let rejected = server
        .client
        .subscribe(subscribe_request("BINANCE", "BTCUSD"))
        .await
        .unwrap_err();
    assert_eq!(rejected.code(), Code::Unavailable);

    server.handle.abort();
}

// =============================================================================
// Status Tests
// =============================================================================

#[tokio::test]
async fn test_get_status_lists_sessions() {
    let mut server = setup_test_server(ScriptedSource::steady(64_000.0)).await;

    let mut stream = server
        .client
        .subscribe(subscribe_request("BINANCE", "BTCUSD"))
        .await
        .unwrap()
        .into_inner();
    timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();

    let status = server
        .client
        .get_status(Request::new(GetStatusRequest {}))
        .await
        .unwrap()
        .into_inner()
        .status
        .unwrap();

    assert_eq!(status.version, "test-0.0.1");
    assert_eq!(status.subscriber_count, 1);
    assert_eq!(status.sessions.len(), 1);

    let session = &status.sessions[0];
    assert_eq!(session.exchange, "BINANCE");
    assert_eq!(session.ticker, "BTCUSD");
    assert_eq!(session.state, SessionState::Running as i32);
    assert_eq!(session.subscriber_count, 1);
    assert!(session.samples_published >= 1);
    assert_eq!(session.last_price, Some(64_000.0));

    server.handle.abort();
}

#[tokio::test]
async fn test_get_status_when_idle() {
    let mut server = setup_test_server(ScriptedSource::steady(1.0)).await;

    let status = server
        .client
        .get_status(Request::new(GetStatusRequest {}))
        .await
        .unwrap()
        .into_inner()
        .status
        .unwrap();

    assert_eq!(status.subscriber_count, 0);
    assert!(status.sessions.is_empty());
    assert!(status.started_at.is_some());
    assert!(status.current_time.is_some());

    server.handle.abort();
}
