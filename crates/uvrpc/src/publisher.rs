use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use uvrpc_core::transport::ErrorFn;
use uvrpc_core::{Addr, CommType, Config, Error, ReplyTarget, Transport};
use uvrpc_wire::{Envelope, Kind};

/// Topic publisher: a listening transport fanning Publication envelopes out
/// to its peers.
///
/// Peers may announce topic interest with SubscribeControl envelopes; a peer
/// that has announced receives only matching topics (the empty topic means
/// subscribe-all), while a peer that never announced receives every
/// publication. Delivery is at-most-once per peer, no retries, no replay.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    transport: Transport,
    /// Per-peer announced interest. Absent peer: no filtering.
    interest: Mutex<HashMap<ReplyTarget, HashSet<String>>>,
    on_error: ErrorFn,
}

impl Publisher {
    /// Bind the configured endpoint and start accepting subscribers.
    pub async fn bind(config: Config) -> Result<Publisher, Error> {
        if config.comm_type != CommType::PubSub {
            return Err(Error::InvalidParam("publisher requires pub-sub mode"));
        }
        let on_error = config.error_sink();
        let transport = Transport::listen(&config).await?;

        let inner = Arc::new(PublisherInner {
            transport: transport.clone(),
            interest: Mutex::new(HashMap::new()),
            on_error: on_error.clone(),
        });
        let recv = inner.clone();
        transport.start(
            Arc::new(move |frame, target| recv.on_frame(frame, target)),
            on_error,
        )?;
        tracing::debug!(addr = %inner.transport.local_addr(), "publisher listening");
        Ok(Publisher { inner })
    }

    /// Broadcast one publication. Returns the number of peers it was queued
    /// for after upstream filtering; per-peer queue errors go to the error
    /// sink and do not fail the publish.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<usize, Error> {
        let envelope = Envelope::publication(topic, payload.into())?;
        let body = envelope.encode();

        let recipients: Vec<ReplyTarget> = {
            let interest = self.inner.interest.lock();
            self.inner
                .transport
                .peers()
                .into_iter()
                .filter(|peer| match interest.get(peer) {
                    None => true,
                    Some(topics) => topics.contains("") || topics.contains(topic),
                })
                .collect()
        };

        let mut sent = 0;
        for peer in recipients {
            match self.inner.transport.send_to(&body, &peer) {
                Ok(()) => sent += 1,
                Err(err) => (self.inner.on_error)(&err),
            }
        }
        tracing::trace!(topic, peers = sent, "published");
        Ok(sent)
    }

    /// The bound address; for `:0` binds this carries the actual port.
    pub fn local_addr(&self) -> Addr {
        self.inner.transport.local_addr()
    }

    /// Peers currently connected (stream) or seen (datagram).
    pub fn peers(&self) -> Vec<ReplyTarget> {
        self.inner.transport.peers()
    }

    /// Stop publishing and release the endpoint. Idempotent.
    pub fn shutdown(&self) {
        self.inner.transport.shutdown();
    }
}

impl PublisherInner {
    fn on_frame(&self, frame: Bytes, target: ReplyTarget) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                (self.on_error)(&Error::EnvelopeDecode(err));
                return;
            }
        };
        match envelope.kind {
            Kind::SubscribeControl => {
                // First payload byte 0 retracts; anything else (or empty)
                // announces.
                let subscribe = envelope.payload.first().copied() != Some(0);
                let mut interest = self.interest.lock();
                let topics = interest.entry(target.clone()).or_default();
                if subscribe {
                    topics.insert(envelope.name.clone());
                    tracing::debug!(peer = %target, topic = %envelope.name, "peer subscribed");
                } else {
                    topics.remove(&envelope.name);
                    tracing::debug!(peer = %target, topic = %envelope.name, "peer unsubscribed");
                }
            }
            other => {
                (self.on_error)(&Error::UnexpectedKind(other));
            }
        }
    }
}
