use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use uvrpc_core::transport::ErrorFn;
use uvrpc_core::{
    Addr, Bus, BusStatsSnapshot, CommType, Config, Error, SubscriptionId, Transport,
};
use uvrpc_wire::{Envelope, Kind};

/// Topic subscriber: a dialed transport feeding Publications into a local
/// subscription table.
///
/// Exact-topic subscriptions are announced upstream so a filtering publisher
/// can skip unwanted topics; predicate-filtered subscriptions announce
/// subscribe-all and match locally. A disconnected subscriber loses
/// in-flight publications; reconnection does not replay.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

struct SubscriberInner {
    transport: Transport,
    bus: Arc<Bus>,
    on_error: ErrorFn,
    state: Mutex<SubState>,
}

#[derive(Default)]
struct SubState {
    /// Exact topic per subscription id; `None` for filtered subscriptions.
    topics: HashMap<SubscriptionId, Option<String>>,
    /// How many live exact subscriptions reference each topic.
    exact_refs: HashMap<String, usize>,
}

impl Subscriber {
    /// Dial the configured publisher endpoint.
    pub async fn connect(config: Config) -> Result<Subscriber, Error> {
        if config.comm_type != CommType::PubSub {
            return Err(Error::InvalidParam("subscriber requires pub-sub mode"));
        }
        let bus = Arc::new(Bus::new());
        let on_error = config.error_sink();
        let transport = Transport::connect(&config).await?;

        let inner = Arc::new(SubscriberInner {
            transport: transport.clone(),
            bus,
            on_error: on_error.clone(),
            state: Mutex::new(SubState::default()),
        });
        let recv = inner.clone();
        transport.start(
            Arc::new(move |frame, _target| recv.on_frame(frame)),
            on_error,
        )?;
        tracing::debug!(addr = %inner.transport.local_addr(), "subscriber connected");
        Ok(Subscriber { inner })
    }

    /// Subscribe to one exact topic. Duplicate subscriptions are allowed and
    /// each receives its own dispatch.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        callback: impl Fn(&str, &Bytes) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        let topic = topic.into();
        let id = self.inner.bus.subscribe(topic.clone(), None, Arc::new(callback));

        let announce = {
            let mut state = self.inner.state.lock();
            state.topics.insert(id, Some(topic.clone()));
            let refs = state.exact_refs.entry(topic.clone()).or_insert(0);
            *refs += 1;
            *refs == 1
        };
        if announce {
            self.send_control(&topic, true)?;
        }
        Ok(id)
    }

    /// Subscribe with a matching predicate `(pattern, topic) -> bool`
    /// (prefix, glob, whatever the caller wants). Filtering happens locally;
    /// upstream, the subscriber announces subscribe-all so no topic is
    /// withheld.
    pub fn subscribe_filtered(
        &self,
        pattern: impl Into<String>,
        filter: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
        callback: impl Fn(&str, &Bytes) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        let filter: uvrpc_core::TopicFilter = Arc::new(filter);
        let id = self
            .inner
            .bus
            .subscribe(pattern.into(), Some(filter), Arc::new(callback));
        self.inner.state.lock().topics.insert(id, None);
        self.send_control("", true)?;
        Ok(id)
    }

    /// Drop one subscription. The upstream announcement is retracted when
    /// the last exact subscription for its topic goes away.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), Error> {
        self.inner.bus.unsubscribe(id)?;

        let retract = {
            let mut state = self.inner.state.lock();
            match state.topics.remove(&id) {
                Some(Some(topic)) => {
                    let gone = match state.exact_refs.get_mut(&topic) {
                        Some(refs) => {
                            *refs -= 1;
                            *refs == 0
                        }
                        None => false,
                    };
                    if gone {
                        state.exact_refs.remove(&topic);
                        Some(topic)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(topic) = retract {
            self.send_control(&topic, false)?;
        }
        Ok(())
    }

    fn send_control(&self, topic: &str, subscribe: bool) -> Result<(), Error> {
        let payload = if subscribe {
            Bytes::from_static(&[1])
        } else {
            Bytes::from_static(&[0])
        };
        let envelope = Envelope::subscribe_control(topic, payload)?;
        self.inner.transport.send(&envelope.encode())?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// The dialed address.
    pub fn remote_addr(&self) -> Addr {
        self.inner.transport.local_addr()
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner.bus.stats()
    }

    /// Tear down: in-flight publications are lost, local subscriptions
    /// released. Idempotent.
    pub fn disconnect(&self) {
        self.inner.transport.shutdown();
    }
}

impl SubscriberInner {
    fn on_frame(&self, frame: Bytes) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                (self.on_error)(&Error::EnvelopeDecode(err));
                return;
            }
        };
        match envelope.kind {
            Kind::Publication => {
                self.bus.dispatch_publication(&envelope.name, &envelope.payload);
            }
            other => {
                (self.on_error)(&Error::UnexpectedKind(other));
            }
        }
    }
}
