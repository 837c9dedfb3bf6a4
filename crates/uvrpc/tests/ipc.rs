//! Unix-domain socket sessions.
#![cfg(unix)]

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uvrpc::prelude::*;
use uvrpc_testkit::{init_tracing, temp_sock_path};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn ipc_echo() {
    init_tracing();
    let path = temp_sock_path("echo");
    let addr = format!("ipc://{}", path.display());

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

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call("echo", &b"over the socket file"[..], move |status, payload| {
            tx.send((status, payload)).unwrap();
        })
        .unwrap();

    let (status, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(payload.as_ref(), b"over the socket file");

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn socket_file_is_removed_on_shutdown() {
    init_tracing();
    let path = temp_sock_path("cleanup");
    let addr = format!("ipc://{}", path.display());

    let server = Server::bind(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();
    assert!(path.exists());

    server.shutdown();
    assert!(!path.exists());
}

#[tokio::test]
async fn bind_on_occupied_path_fails() {
    init_tracing();
    let path = temp_sock_path("occupied");
    let addr = format!("ipc://{}", path.display());

    let _server = Server::bind(Config::builder().address(&addr).build().unwrap())
        .await
        .unwrap();
    let dup = Server::bind(Config::builder().address(&addr).build().unwrap()).await;
    assert!(matches!(dup, Err(uvrpc::Error::Bind(_))));
}
