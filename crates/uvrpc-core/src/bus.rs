use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use uvrpc_wire::{Envelope, Status};

use crate::{Error, ReplySink, ReplyTarget};

/// Request handler: receives the decoded request and a one-shot reply sink.
pub type HandlerFn = Arc<dyn Fn(Request, ReplySink) + Send + Sync + 'static>;

/// Pending-call callback: receives the response status and payload.
pub type ResponseFn = Box<dyn FnOnce(Status, Bytes) + Send + 'static>;

/// Subscription callback: receives the topic and the publication payload.
pub type PublicationFn = Arc<dyn Fn(&str, &Bytes) + Send + Sync + 'static>;

/// Optional subscription matcher `(pattern, topic) -> bool`. Without one,
/// matching is exact string equality.
pub type TopicFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync + 'static>;

/// Identifier returned by [`Bus::subscribe`].
pub type SubscriptionId = u64;

/// A decoded request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub msgid: u64,
    pub payload: Bytes,
    pub peer: ReplyTarget,
}

struct PendingEntry {
    callback: ResponseFn,
    deadline: Option<Instant>,
}

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    filter: Option<TopicFilter>,
    callback: PublicationFn,
}

/// Routing core: handler table, pending-call table, subscription table, and
/// a statistics block.
///
/// The bus owns no I/O; sessions feed it decoded envelopes and it invokes
/// the registered callbacks. Callbacks always run outside the table locks.
pub struct Bus {
    handlers: Mutex<HashMap<String, HandlerFn>>,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_subscription: AtomicU64,
    stats: BusStats,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            stats: BusStats::default(),
        }
    }

    /// Register a request handler under `method`. Method names are
    /// case-sensitive and unique.
    pub fn register_handler(&self, method: impl Into<String>, handler: HandlerFn) -> Result<(), Error> {
        let method = method.into();
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&method) {
            return Err(Error::AlreadyExists(method));
        }
        handlers.insert(method, handler);
        Ok(())
    }

    pub fn unregister_handler(&self, method: &str) -> Result<(), Error> {
        self.handlers
            .lock()
            .remove(method)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Track an in-flight call. A fresh msgid is the caller's business.
    pub fn register_pending(
        &self,
        msgid: u64,
        callback: ResponseFn,
        deadline: Option<Instant>,
    ) -> Result<(), Error> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&msgid) {
            return Err(Error::AlreadyExists(format!("msgid {}", msgid)));
        }
        pending.insert(msgid, PendingEntry { callback, deadline });
        Ok(())
    }

    /// Remove a pending entry without invoking its callback (the send-failed
    /// path, where the caller reports synchronously instead).
    pub fn cancel_pending(&self, msgid: u64) -> Result<(), Error> {
        self.pending
            .lock()
            .remove(&msgid)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Add a topic subscription; exact match unless `filter` is given.
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        filter: Option<TopicFilter>,
        callback: PublicationFn,
    ) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription {
            id,
            pattern: pattern.into(),
            filter,
            callback,
        });
        self.stats.subscriptions_active.fetch_add(1, Ordering::Relaxed);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), Error> {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        if subscriptions.len() == before {
            return Err(Error::NotFound);
        }
        self.stats.subscriptions_active.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// The exact-topic pattern of a subscription, if it is unfiltered.
    pub fn subscription_pattern(&self, id: SubscriptionId) -> Option<String> {
        self.subscriptions
            .lock()
            .iter()
            .find(|sub| sub.id == id)
            .map(|sub| sub.pattern.clone())
    }

    /// Route a request envelope to its handler, or sink `MethodNotFound`.
    pub fn dispatch_request(&self, envelope: &Envelope, sink: ReplySink) {
        self.stats.frames_routed.fetch_add(1, Ordering::Relaxed);
        let handler = self.handlers.lock().get(&envelope.name).cloned();
        match handler {
            Some(handler) => {
                self.stats.handler_hits.fetch_add(1, Ordering::Relaxed);
                let request = Request {
                    method: envelope.name.clone(),
                    msgid: envelope.msgid,
                    payload: envelope.payload.clone(),
                    peer: sink.peer().clone(),
                };
                handler(request, sink);
            }
            None => {
                self.stats.handler_misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(method = %envelope.name, "no handler registered");
                if let Err(err) = sink.send(Status::MethodNotFound, Bytes::new()) {
                    tracing::warn!(error = %err, "failed to send method-not-found response");
                }
            }
        }
    }

    /// Route a response envelope to its pending callback; stale responses
    /// are counted and dropped.
    pub fn dispatch_response(&self, envelope: &Envelope) {
        self.stats.frames_routed.fetch_add(1, Ordering::Relaxed);
        let entry = self.pending.lock().remove(&envelope.msgid);
        match entry {
            Some(entry) => {
                self.stats.responses_matched.fetch_add(1, Ordering::Relaxed);
                (entry.callback)(Status::from_code(envelope.status), envelope.payload.clone());
            }
            None => {
                self.stats.responses_stale.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(msgid = envelope.msgid, "stale response dropped");
            }
        }
    }

    /// Fan a publication out to every matching subscription.
    pub fn dispatch_publication(&self, topic: &str, payload: &Bytes) {
        self.stats.frames_routed.fetch_add(1, Ordering::Relaxed);
        let matching: Vec<PublicationFn> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|sub| match &sub.filter {
                Some(filter) => filter(&sub.pattern, topic),
                None => sub.pattern == topic,
            })
            .map(|sub| sub.callback.clone())
            .collect();
        for callback in matching {
            self.stats
                .publications_dispatched
                .fetch_add(1, Ordering::Relaxed);
            callback(topic, payload);
        }
    }

    /// Drain the pending table, invoking every callback once with `status`.
    pub fn cancel_all_pending(&self, status: Status) {
        let drained: Vec<PendingEntry> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            (entry.callback)(status, Bytes::new());
        }
    }

    /// Remove and fail every entry whose deadline has passed.
    pub fn expire_deadlines(&self, now: Instant) {
        let expired: Vec<PendingEntry> = {
            let mut pending = self.pending.lock();
            let msgids: Vec<u64> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline.is_some_and(|deadline| deadline <= now))
                .map(|(msgid, _)| *msgid)
                .collect();
            msgids
                .into_iter()
                .filter_map(|msgid| pending.remove(&msgid))
                .collect()
        };
        for entry in expired {
            (entry.callback)(Status::Timeout, Bytes::new());
        }
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn clear_stats(&self) {
        self.stats.clear();
    }
}

/// Atomic bus counters.
#[derive(Default)]
pub struct BusStats {
    pub frames_routed: AtomicU64,
    pub handler_hits: AtomicU64,
    pub handler_misses: AtomicU64,
    pub responses_matched: AtomicU64,
    pub responses_stale: AtomicU64,
    pub publications_dispatched: AtomicU64,
    pub subscriptions_active: AtomicU64,
}

/// Non-atomic snapshot of [`BusStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStatsSnapshot {
    pub frames_routed: u64,
    pub handler_hits: u64,
    pub handler_misses: u64,
    pub responses_matched: u64,
    pub responses_stale: u64,
    pub publications_dispatched: u64,
    pub subscriptions_active: u64,
}

impl BusStats {
    fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            handler_hits: self.handler_hits.load(Ordering::Relaxed),
            handler_misses: self.handler_misses.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            responses_stale: self.responses_stale.load(Ordering::Relaxed),
            publications_dispatched: self.publications_dispatched.load(Ordering::Relaxed),
            subscriptions_active: self.subscriptions_active.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        self.frames_routed.store(0, Ordering::Relaxed);
        self.handler_hits.store(0, Ordering::Relaxed);
        self.handler_misses.store(0, Ordering::Relaxed);
        self.responses_matched.store(0, Ordering::Relaxed);
        self.responses_stale.store(0, Ordering::Relaxed);
        self.publications_dispatched.store(0, Ordering::Relaxed);
        // subscriptions_active is a gauge, not a counter; it survives clears.
    }
}
