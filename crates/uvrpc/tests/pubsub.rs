//! Publisher/subscriber sessions over stream transports.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uvrpc::prelude::*;
use uvrpc_testkit::init_tracing;

const WAIT: Duration = Duration::from_secs(5);

async fn bind_publisher() -> Publisher {
    init_tracing();
    Publisher::bind(
        Config::builder()
            .address("tcp://127.0.0.1:0")
            .comm_type(CommType::PubSub)
            .build()
            .unwrap(),
    )
    .await
    .unwrap()
}

async fn connect_subscriber(publisher: &Publisher) -> Subscriber {
    Subscriber::connect(
        Config::builder()
            .address(publisher.local_addr().to_string())
            .comm_type(CommType::PubSub)
            .build()
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Wait until every connected peer has announced interest: once announced,
/// a topic nobody subscribed to fans out to zero peers.
async fn await_interest_settled(publisher: &Publisher, peers: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let settled = publisher.peers().len() == peers
            && publisher.publish("canary-nobody-wants", Bytes::new()).unwrap() == 0;
        if settled {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "interest never settled"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn upstream_filtering_routes_by_topic() {
    let publisher = bind_publisher().await;
    let sub_alpha = connect_subscriber(&publisher).await;
    let sub_beta = connect_subscriber(&publisher).await;

    let (tx_alpha, mut rx_alpha) = mpsc::unbounded_channel();
    sub_alpha
        .subscribe("alpha", move |topic, payload| {
            let _ = tx_alpha.send((topic.to_owned(), payload.clone()));
        })
        .unwrap();
    let (tx_beta, mut rx_beta) = mpsc::unbounded_channel();
    sub_beta
        .subscribe("beta", move |topic, payload| {
            let _ = tx_beta.send((topic.to_owned(), payload.clone()));
        })
        .unwrap();

    await_interest_settled(&publisher, 2).await;

    assert_eq!(publisher.publish("alpha", &b"a1"[..]).unwrap(), 1);
    assert_eq!(publisher.publish("beta", &b"b1"[..]).unwrap(), 1);
    assert_eq!(publisher.publish("alpha", &b"a2"[..]).unwrap(), 1);

    let (topic, payload) = timeout(WAIT, rx_alpha.recv()).await.unwrap().unwrap();
    assert_eq!((topic.as_str(), payload.as_ref()), ("alpha", &b"a1"[..]));
    let (topic, payload) = timeout(WAIT, rx_alpha.recv()).await.unwrap().unwrap();
    assert_eq!((topic.as_str(), payload.as_ref()), ("alpha", &b"a2"[..]));

    let (topic, payload) = timeout(WAIT, rx_beta.recv()).await.unwrap().unwrap();
    assert_eq!((topic.as_str(), payload.as_ref()), ("beta", &b"b1"[..]));

    sub_alpha.disconnect();
    sub_beta.disconnect();
    publisher.shutdown();
}

#[tokio::test]
async fn duplicate_subscriptions_dispatch_once_each() {
    let publisher = bind_publisher().await;
    let subscriber = connect_subscriber(&publisher).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for tag in ["first", "second"] {
        let tx = tx.clone();
        subscriber
            .subscribe("dup", move |_, _| {
                let _ = tx.send(tag);
            })
            .unwrap();
    }
    await_interest_settled(&publisher, 1).await;

    publisher.publish("dup", Bytes::new()).unwrap();

    let mut got = vec![
        timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
        timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
    ];
    got.sort();
    assert_eq!(got, ["first", "second"]);
    assert_eq!(subscriber.stats().publications_dispatched, 2);

    subscriber.disconnect();
    publisher.shutdown();
}

#[tokio::test]
async fn filtered_subscription_matches_locally() {
    let publisher = bind_publisher().await;
    let subscriber = connect_subscriber(&publisher).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    subscriber
        .subscribe_filtered(
            "metrics/",
            |pattern, topic| topic.starts_with(pattern),
            move |topic, payload| {
                let _ = tx.send((topic.to_owned(), payload.clone()));
            },
        )
        .unwrap();

    // A filtered subscriber announces subscribe-all upstream, so every
    // topic reaches it and the predicate decides locally.
    let deadline = tokio::time::Instant::now() + WAIT;
    while publisher.peers().len() < 1
        || publisher.publish("warmup/x", Bytes::new()).unwrap() < 1
    {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    publisher.publish("metrics/cpu", &b"93"[..]).unwrap();
    publisher.publish("logs/cpu", &b"noise"[..]).unwrap();
    publisher.publish("metrics/mem", &b"41"[..]).unwrap();

    let (topic, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!((topic.as_str(), payload.as_ref()), ("metrics/cpu", &b"93"[..]));
    let (topic, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!((topic.as_str(), payload.as_ref()), ("metrics/mem", &b"41"[..]));

    subscriber.disconnect();
    publisher.shutdown();
}

#[tokio::test]
async fn unsubscribe_retracts_upstream_interest() {
    let publisher = bind_publisher().await;
    let subscriber = connect_subscriber(&publisher).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = subscriber
        .subscribe("fleeting", move |_, payload| {
            let _ = tx.send(payload.clone());
        })
        .unwrap();
    await_interest_settled(&publisher, 1).await;
    assert_eq!(publisher.publish("fleeting", &b"one"[..]).unwrap(), 1);
    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload.as_ref(), b"one");

    subscriber.unsubscribe(id).unwrap();

    // Once the retraction lands, the fan-out count drops to zero.
    let deadline = tokio::time::Instant::now() + WAIT;
    while publisher.publish("fleeting", &b"two"[..]).unwrap() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "retraction never landed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    subscriber.disconnect();
    publisher.shutdown();
}

#[tokio::test]
async fn late_subscriber_misses_earlier_publications() {
    let publisher = bind_publisher().await;

    // Published into the void: no peers yet.
    assert_eq!(publisher.publish("history", &b"lost"[..]).unwrap(), 0);

    let subscriber = connect_subscriber(&publisher).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    subscriber
        .subscribe("history", move |_, payload| {
            let _ = tx.send(payload.clone());
        })
        .unwrap();
    await_interest_settled(&publisher, 1).await;

    publisher.publish("history", &b"fresh"[..]).unwrap();
    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    // No replay of what was published before the subscription.
    assert_eq!(payload.as_ref(), b"fresh");

    subscriber.disconnect();
    publisher.shutdown();
}
