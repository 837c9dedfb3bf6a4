//! In-process loopback sessions.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uvrpc::prelude::*;
use uvrpc_testkit::{init_tracing, unique_name};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn loopback_pipeline_on_one_runtime() {
    init_tracing();
    let addr = format!("inproc://{}", unique_name("loopback"));

    let server = Server::bind(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();
    server
        .register("echo", |request, reply| {
            let _ = reply.send(Status::Ok, request.payload);
        })
        .unwrap();

    let client = Client::connect(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();

    const CALLS: u32 = 50;
    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..CALLS {
        let tx = tx.clone();
        let mut payload = vec![0u8; 16];
        payload[..4].copy_from_slice(&i.to_be_bytes());
        client
            .call("echo", Bytes::from(payload), move |status, payload| {
                tx.send((i, status, payload)).unwrap();
            })
            .unwrap();
    }
    drop(tx);

    let mut seen = 0u32;
    while let Some((i, status, payload)) = timeout(WAIT, rx.recv()).await.unwrap() {
        assert_eq!(status, Status::Ok);
        assert_eq!(payload.len(), 16);
        assert_eq!(payload[..4], i.to_be_bytes());
        seen += 1;
    }
    assert_eq!(seen, CALLS);

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn second_listener_on_same_name_is_refused() {
    init_tracing();
    let addr = format!("inproc://{}", unique_name("exclusive"));

    let server = Server::bind(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();
    let dup = Server::bind(Config::builder().address(&addr).build().unwrap()).await;
    assert!(matches!(dup, Err(uvrpc::Error::AlreadyExists(_))));

    // The name frees up on shutdown.
    server.shutdown();
    let reuse = Server::bind(Config::builder().address(&addr).build().unwrap()).await;
    assert!(reuse.is_ok());
}

#[tokio::test]
async fn connect_without_listener_fails() {
    init_tracing();
    let addr = format!("inproc://{}", unique_name("orphan"));
    let result = Client::connect(Config::builder().address(&addr).build().unwrap()).await;
    assert!(matches!(result, Err(uvrpc::Error::Connect(_))));
}

#[tokio::test]
async fn two_clients_are_answered_independently() {
    init_tracing();
    let addr = format!("inproc://{}", unique_name("pair"));

    let server = Server::bind(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();
    server
        .register("whoami", |request, reply| {
            // Echo the request payload back, tagged by the server.
            let _ = reply.send(Status::Ok, request.payload);
        })
        .unwrap();

    let client_a = Client::connect(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();
    let client_b = Client::connect(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    client_a
        .call("whoami", &b"a"[..], move |_, payload| {
            tx_a.send(payload).unwrap();
        })
        .unwrap();
    client_b
        .call("whoami", &b"b"[..], move |_, payload| {
            tx_b.send(payload).unwrap();
        })
        .unwrap();

    assert_eq!(
        timeout(WAIT, rx_a.recv()).await.unwrap().unwrap().as_ref(),
        b"a"
    );
    assert_eq!(
        timeout(WAIT, rx_b.recv()).await.unwrap().unwrap().as_ref(),
        b"b"
    );

    client_a.disconnect();
    client_b.disconnect();
    server.shutdown();
}
