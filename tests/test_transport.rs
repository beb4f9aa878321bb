//! Read loop behaviour over in-memory connections

use std::sync::Arc;
use std::time::Duration;

use exchange_stream::parser::ErrorCode;
use exchange_stream::{Config, Listener, OutputQueue, StreamClient, StreamError, StreamSettings, SubscriptionKind};
use tokio::io::{duplex, AsyncWriteExt};

fn client(timeout_secs: u64) -> Arc<StreamClient> {
    let (publisher, _receiver) = OutputQueue::unbounded();
    let listener = Listener::new(publisher, StreamSettings::default()).into_shared();
    let config = Config {
        timeout_secs,
        ..Config::default()
    };
    Arc::new(StreamClient::new(Arc::new(config), listener))
}

#[tokio::test]
async fn test_frames_reach_listener_until_server_closes() {
    let client = client(5);
    let (io, mut server) = duplex(4096);
    client.connect_with(io).await;
    client.listener().write().register_stream(1, SubscriptionKind::Market);

    let reader = client.clone();
    let handle = tokio::spawn(async move { reader.read_loop().await });

    server
        .write_all(b"{\"op\":\"connection\",\"connectionId\":\"002-051134157842-432409\"}\r\n")
        .await
        .unwrap();
    // one frame split across two writes
    server
        .write_all(b"{\"op\":\"mcm\",\"id\":1,\"ct\":\"SUB_IMAGE\",\"pt\":1,\"clk\":\"AAA\",\"mc\":[{\"id\":\"1.1\",")
        .await
        .unwrap();
    server
        .write_all(b"\"img\":true,\"marketDefinition\":{\"status\":\"OPEN\",\"runners\":[]}}]}\r\n")
        .await
        .unwrap();
    server
        .write_all(
            b"{\"op\":\"status\",\"id\":1,\"statusCode\":\"FAILURE\",\"errorCode\":\"TIMEOUT\",\"connectionClosed\":true}\r\n",
        )
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(StreamError::ServerClosed(Some(ErrorCode::Timeout)))));
    assert!(result.unwrap_err().is_fatal());
    assert!(!client.is_running());

    let listener = client.listener().read();
    assert_eq!(listener.connection_id(), Some("002-051134157842-432409"));
    assert_eq!(listener.cache_count(SubscriptionKind::Market), 1);
    assert_eq!(listener.clk(SubscriptionKind::Market).as_deref(), Some("AAA"));
}

#[tokio::test]
async fn test_server_close_is_socket_error() {
    let client = client(5);
    let mock = tokio_test::io::Builder::new()
        .read(b"{\"op\":\"connection\",\"connectionId\":\"abc\"}\r\n")
        .build();
    client.connect_with(mock).await;

    let result = client.read_loop().await;
    assert!(matches!(result, Err(StreamError::Socket(_))));
    assert!(result.unwrap_err().is_fatal());
    assert_eq!(client.listener().read().connection_id(), Some("abc"));
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_silent_connection_times_out() {
    let client = client(1);
    let (io, _server) = duplex(64);
    client.connect_with(io).await;

    let result = client.read_loop().await;
    assert!(matches!(result, Err(StreamError::Timeout(1))));
}

#[tokio::test]
async fn test_stop_ends_read_loop() {
    let client = client(30);
    let (io, _server) = duplex(64);
    client.connect_with(io).await;

    let reader = client.clone();
    let handle = tokio::spawn(async move { reader.read_loop().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.stop();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_malformed_frame_does_not_end_loop() {
    let client = client(5);
    let (io, mut server) = duplex(4096);
    client.connect_with(io).await;

    let reader = client.clone();
    let handle = tokio::spawn(async move { reader.read_loop().await });

    server.write_all(b"{not json\r\n").await.unwrap();
    server
        .write_all(b"{\"op\":\"connection\",\"connectionId\":\"after\"}\r\n")
        .await
        .unwrap();
    drop(server);

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(StreamError::Socket(_))));
    assert_eq!(client.listener().read().connection_id(), Some("after"));
}
