//! Transport conformance tests.
//!
//! Frame-level round trips across the transport families: every complete
//! frame delivered upward, per-peer arrival order preserved, addressed
//! replies routed by `ReplyTarget`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uvrpc_core::{Config, ReplyTarget, Transport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Start a listener that echoes every frame back to its sender.
async fn echo_listener(addr: &str) -> Transport {
    let config = Config::builder().address(addr).build().unwrap();
    let listener = Transport::listen(&config).await.unwrap();
    let echo = listener.clone();
    listener
        .start(
            Arc::new(move |frame: Bytes, target: ReplyTarget| {
                echo.send_to(&frame, &target).unwrap();
            }),
            Arc::new(|_| {}),
        )
        .unwrap();
    listener
}

/// Connect a client and collect everything it receives.
async fn collecting_client(addr: &str) -> (Transport, mpsc::UnboundedReceiver<Bytes>) {
    let config = Config::builder().address(addr).build().unwrap();
    let client = Transport::connect(&config).await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .start(
            Arc::new(move |frame: Bytes, _| {
                let _ = tx.send(frame);
            }),
            Arc::new(|_| {}),
        )
        .unwrap();
    (client, rx)
}

async fn run_roundtrip(addr: &str) {
    init_tracing();
    let listener = echo_listener(addr).await;
    let bound = listener.local_addr().to_string();
    let (client, mut rx) = collecting_client(&bound).await;

    client.send(b"ping").unwrap();
    let frame = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("echo timed out")
        .expect("client channel closed");
    assert_eq!(frame.as_ref(), b"ping");

    client.shutdown();
    listener.shutdown();
}

async fn run_ordered_pipeline(addr: &str, count: u32) {
    init_tracing();
    let listener = echo_listener(addr).await;
    let bound = listener.local_addr().to_string();
    let (client, mut rx) = collecting_client(&bound).await;

    for i in 0..count {
        client.send(&i.to_be_bytes()).unwrap();
    }
    for expected in 0..count {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("echo timed out")
            .expect("client channel closed");
        assert_eq!(frame[..], expected.to_be_bytes());
    }

    client.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn tcp_roundtrip() {
    run_roundtrip("tcp://127.0.0.1:0").await;
}

#[tokio::test]
async fn tcp_frames_arrive_in_order() {
    run_ordered_pipeline("tcp://127.0.0.1:0", 200).await;
}

#[tokio::test]
async fn udp_roundtrip() {
    run_roundtrip("udp://127.0.0.1:0").await;
}

#[tokio::test]
async fn inproc_roundtrip() {
    run_roundtrip("inproc://conformance-roundtrip").await;
}

#[tokio::test]
async fn inproc_frames_arrive_in_order() {
    run_ordered_pipeline("inproc://conformance-ordered", 200).await;
}

#[cfg(unix)]
#[tokio::test]
async fn ipc_roundtrip() {
    let path = std::env::temp_dir().join(format!("uvrpc-conf-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    run_roundtrip(&format!("ipc://{}", path.display())).await;
}

#[tokio::test]
async fn listener_tracks_peers() {
    init_tracing();
    let listener = echo_listener("tcp://127.0.0.1:0").await;
    let bound = listener.local_addr().to_string();

    let (client_a, _rx_a) = collecting_client(&bound).await;
    let (client_b, _rx_b) = collecting_client(&bound).await;

    // Accept loops run asynchronously; poll until both connections land.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while listener.peers().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "peers never appeared");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(listener.peers().len(), 2);

    client_a.shutdown();
    client_b.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn udp_listener_discovers_peers_from_datagrams() {
    init_tracing();
    let listener = echo_listener("udp://127.0.0.1:0").await;
    let bound = listener.local_addr().to_string();

    assert!(listener.peers().is_empty());
    let (client, mut rx) = collecting_client(&bound).await;
    client.send(b"hello").unwrap();

    let frame = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("echo timed out")
        .expect("client channel closed");
    assert_eq!(frame.as_ref(), b"hello");
    assert_eq!(listener.peers().len(), 1);

    client.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn broadcast_reaches_every_stream_peer() {
    init_tracing();
    let config = Config::builder()
        .address("tcp://127.0.0.1:0")
        .build()
        .unwrap();
    let listener = Transport::listen(&config).await.unwrap();
    listener
        .start(Arc::new(|_, _| {}), Arc::new(|_| {}))
        .unwrap();
    let bound = listener.local_addr().to_string();

    let (client_a, mut rx_a) = collecting_client(&bound).await;
    let (client_b, mut rx_b) = collecting_client(&bound).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while listener.peers().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "peers never appeared");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(listener.send(b"to-everyone").unwrap(), 2);
    for rx in [&mut rx_a, &mut rx_b] {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("broadcast timed out")
            .expect("client channel closed");
        assert_eq!(frame.as_ref(), b"to-everyone");
    }

    client_a.shutdown();
    client_b.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn client_send_after_shutdown_is_refused() {
    init_tracing();
    let listener = echo_listener("tcp://127.0.0.1:0").await;
    let bound = listener.local_addr().to_string();
    let (client, _rx) = collecting_client(&bound).await;

    client.shutdown();
    assert!(client.send(b"late").is_err());

    listener.shutdown();
}
