//! Request/response sessions over TCP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uvrpc::prelude::*;
use uvrpc_testkit::init_tracing;

const WAIT: Duration = Duration::from_secs(5);

async fn echo_server(addr: &str) -> Server {
    init_tracing();
    let server = Server::bind(Config::builder().address(addr).build().unwrap())
        .await
        .unwrap();
    server
        .register("echo", |request, reply| {
            let _ = reply.send(Status::Ok, request.payload);
        })
        .unwrap();
    server
}

async fn connect(addr: &str) -> Client {
    Client::connect(Config::builder().address(addr).build().unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn tcp_echo() {
    let server = echo_server("tcp://127.0.0.1:0").await;
    let client = connect(&server.local_addr().to_string()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call("echo", &b"hello"[..], move |status, payload| {
            tx.send((status, payload)).unwrap();
        })
        .unwrap();

    let (status, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(payload.as_ref(), b"hello");

    let stats = server.stats();
    assert_eq!(stats.handler_hits, 1);
    assert_eq!(stats.handler_misses, 0);

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn unknown_method_gets_method_not_found() {
    let server = echo_server("tcp://127.0.0.1:0").await;
    let client = connect(&server.local_addr().to_string()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call("missing", Bytes::new(), move |status, payload| {
            tx.send((status, payload)).unwrap();
        })
        .unwrap();

    let (status, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status, Status::MethodNotFound);
    assert!(payload.is_empty());
    assert_eq!(server.stats().handler_misses, 1);

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn pipelined_calls_settle_in_request_order() {
    let server = echo_server("tcp://127.0.0.1:0").await;
    let client = connect(&server.local_addr().to_string()).await;

    const CALLS: u32 = 1000;
    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..CALLS {
        let tx = tx.clone();
        let mut payload = vec![0u8; 64];
        payload[..4].copy_from_slice(&i.to_be_bytes());
        client
            .call("echo", Bytes::from(payload), move |status, payload| {
                tx.send((i, status, payload)).unwrap();
            })
            .unwrap();
    }
    drop(tx);

    // All callbacks fire, in response-arrival order, which over one stream
    // is request order; each payload echoes its request.
    let mut next = 0u32;
    while let Some((i, status, payload)) = timeout(WAIT, rx.recv()).await.unwrap() {
        assert_eq!(i, next);
        assert_eq!(status, Status::Ok);
        assert_eq!(payload.len(), 64);
        assert_eq!(payload[..4], i.to_be_bytes());
        next += 1;
    }
    assert_eq!(next, CALLS);
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(client.stats().responses_matched, u64::from(CALLS));
    assert_eq!(client.stats().responses_stale, 0);

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn call_after_disconnect_is_refused_without_callback() {
    let server = echo_server("tcp://127.0.0.1:0").await;
    let client = connect(&server.local_addr().to_string()).await;

    client.disconnect();
    let result = client.call("echo", Bytes::new(), |_, _| {
        panic!("callback must not fire for a refused call");
    });
    assert!(matches!(result, Err(uvrpc::Error::NotConnected)));
    assert_eq!(client.pending_calls(), 0);

    server.shutdown();
}

#[tokio::test]
async fn disconnect_cancels_pending_calls_exactly_once() {
    init_tracing();
    let server = Server::bind(
        Config::builder()
            .address("tcp://127.0.0.1:0")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    // Park the reply sinks so the calls never settle from the server side.
    let parked: Arc<Mutex<Vec<ReplySink>>> = Arc::new(Mutex::new(Vec::new()));
    let park = parked.clone();
    server
        .register("stall", move |_request, reply| {
            park.lock().unwrap().push(reply);
        })
        .unwrap();

    let client = connect(&server.local_addr().to_string()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..3 {
        let tx = tx.clone();
        client
            .call("stall", Bytes::new(), move |status, _| {
                tx.send(status).unwrap();
            })
            .unwrap();
    }
    drop(tx);

    // Give the requests time to reach the server.
    let deadline = tokio::time::Instant::now() + WAIT;
    while parked.lock().unwrap().len() < 3 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.disconnect();
    for _ in 0..3 {
        let status = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(status, Status::Cancelled);
    }
    assert!(rx.recv().await.is_none());
    assert_eq!(client.pending_calls(), 0);

    parked.lock().unwrap().clear();
    server.shutdown();
}

#[tokio::test]
async fn stalled_call_times_out() {
    init_tracing();
    let server = Server::bind(
        Config::builder()
            .address("tcp://127.0.0.1:0")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let parked: Arc<Mutex<Vec<ReplySink>>> = Arc::new(Mutex::new(Vec::new()));
    let park = parked.clone();
    server
        .register("stall", move |_request, reply| {
            park.lock().unwrap().push(reply);
        })
        .unwrap();

    let client = connect(&server.local_addr().to_string()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call_with_timeout("stall", Bytes::new(), Duration::from_millis(50), move |status, _| {
            tx.send(status).unwrap();
        })
        .unwrap();

    let status = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status, Status::Timeout);
    assert_eq!(client.pending_calls(), 0);

    parked.lock().unwrap().clear();
    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn configured_default_timeout_applies() {
    init_tracing();
    let server = Server::bind(
        Config::builder()
            .address("tcp://127.0.0.1:0")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let parked: Arc<Mutex<Vec<ReplySink>>> = Arc::new(Mutex::new(Vec::new()));
    let park = parked.clone();
    server
        .register("stall", move |_request, reply| {
            park.lock().unwrap().push(reply);
        })
        .unwrap();

    let client = Client::connect(
        Config::builder()
            .address(server.local_addr().to_string())
            .call_timeout(Duration::from_millis(50))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call("stall", Bytes::new(), move |status, _| {
            tx.send(status).unwrap();
        })
        .unwrap();
    let status = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status, Status::Timeout);

    parked.lock().unwrap().clear();
    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn handler_status_codes_ride_through() {
    init_tracing();
    let server = Server::bind(
        Config::builder()
            .address("tcp://127.0.0.1:0")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    server
        .register("teapot", |_request, reply| {
            let _ = reply.send(Status::Other(418), Bytes::from_static(b"short and stout"));
        })
        .unwrap();

    let client = connect(&server.local_addr().to_string()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call("teapot", Bytes::new(), move |status, payload| {
            tx.send((status, payload)).unwrap();
        })
        .unwrap();

    let (status, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status, Status::Other(418));
    assert_eq!(payload.as_ref(), b"short and stout");

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn call_promise_bridges_into_combinators() {
    let server = echo_server("tcp://127.0.0.1:0").await;
    let client = connect(&server.local_addr().to_string()).await;

    let promises = vec![
        client.call_promise("echo", &b"A"[..]).unwrap(),
        client.call_promise("echo", &b"B"[..]).unwrap(),
        client.call_promise("echo", &b"C"[..]).unwrap(),
    ];
    let combined = uvrpc::all(&tokio::runtime::Handle::current(), &promises).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    combined
        .then(move |settlement| {
            tx.send(settlement).unwrap();
        })
        .unwrap();

    let settlement = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        settlement,
        uvrpc::Settlement::Fulfilled(Bytes::from_static(b"ABC"))
    );

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn rejected_call_promise_carries_status() {
    let server = echo_server("tcp://127.0.0.1:0").await;
    let client = connect(&server.local_addr().to_string()).await;

    let promise = client.call_promise("missing", Bytes::new()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    promise
        .then(move |settlement| {
            tx.send(settlement).unwrap();
        })
        .unwrap();

    match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
        uvrpc::Settlement::Rejected { code, .. } => assert_eq!(code, Status::MethodNotFound),
        other => panic!("expected rejection, got {other:?}"),
    }

    client.disconnect();
    server.shutdown();
}
