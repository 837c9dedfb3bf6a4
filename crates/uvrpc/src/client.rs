use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uvrpc_core::transport::ErrorFn;
use uvrpc_core::{Addr, Bus, BusStatsSnapshot, CommType, Config, Error, Transport};
use uvrpc_sync::Promise;
use uvrpc_wire::{Envelope, Kind, Status};

/// How often the pending table is scanned for expired deadlines.
const DEADLINE_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// RPC client: a dialed transport, a pending-call table, and a msgid
/// generator.
///
/// Every call allocates a fresh msgid (monotonically increasing from 1,
/// never reused within the client's lifetime; 64-bit wraparound is beyond
/// any realistic call volume and left undefined). Responses are matched by
/// msgid alone and callbacks run in response-arrival order. Disconnecting
/// settles every outstanding call with `Cancelled`.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Transport,
    bus: Arc<Bus>,
    handle: Handle,
    next_msgid: AtomicU64,
    call_timeout: Option<Duration>,
    on_error: ErrorFn,
    deadline_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Dial the configured endpoint. Resolves once connected.
    pub async fn connect(config: Config) -> Result<Client, Error> {
        if config.comm_type != CommType::RequestResponse {
            return Err(Error::InvalidParam("client requires request-response mode"));
        }
        let bus = Arc::new(Bus::new());
        let on_error = config.error_sink();
        let transport = Transport::connect(&config).await?;

        let inner = Arc::new(ClientInner {
            transport: transport.clone(),
            bus: bus.clone(),
            handle: config.handle.clone(),
            next_msgid: AtomicU64::new(0),
            call_timeout: config.call_timeout,
            on_error: on_error.clone(),
            deadline_task: Mutex::new(None),
        });

        let recv = inner.clone();
        transport.start(
            Arc::new(move |frame, _target| recv.on_frame(frame)),
            on_error,
        )?;

        // Coarse scan timer for call deadlines.
        let scan_bus = bus.clone();
        let task = config.handle.spawn(async move {
            let mut interval = tokio::time::interval(DEADLINE_SCAN_INTERVAL);
            loop {
                interval.tick().await;
                scan_bus.expire_deadlines(Instant::now());
            }
        });
        *inner.deadline_task.lock() = Some(task);

        tracing::debug!(addr = %inner.transport.local_addr(), "client connected");
        Ok(Client { inner })
    }

    /// Issue a request.
    ///
    /// `on_response` is invoked exactly once: with the server's status and
    /// payload, `Timeout` if a configured deadline passes, or `Cancelled` on
    /// disconnect. If this returns `Err` the call was never issued and the
    /// callback will not fire: `NotConnected` before the transport is up,
    /// encode errors, or a synchronous send failure.
    pub fn call(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        on_response: impl FnOnce(Status, Bytes) + Send + 'static,
    ) -> Result<u64, Error> {
        self.call_inner(
            method,
            payload.into(),
            self.inner.call_timeout,
            Box::new(on_response),
        )
    }

    /// [`call`](Client::call) with an explicit deadline, overriding the
    /// configured default. Expiry is detected by a coarse 100 ms scan.
    pub fn call_with_timeout(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
        on_response: impl FnOnce(Status, Bytes) + Send + 'static,
    ) -> Result<u64, Error> {
        self.call_inner(method, payload.into(), Some(timeout), Box::new(on_response))
    }

    /// Issue a request settled through a [`Promise`]: fulfilled with the
    /// payload on `Ok`, rejected with the status otherwise.
    pub fn call_promise(&self, method: &str, payload: impl Into<Bytes>) -> Result<Promise, Error> {
        let promise = Promise::new(&self.inner.handle);
        let settle = promise.clone();
        self.call(method, payload, move |status, payload| {
            let _ = if status.is_ok() {
                settle.resolve(payload)
            } else {
                settle.reject(status, status.to_string())
            };
        })?;
        Ok(promise)
    }

    fn call_inner(
        &self,
        method: &str,
        payload: Bytes,
        timeout: Option<Duration>,
        on_response: uvrpc_core::ResponseFn,
    ) -> Result<u64, Error> {
        if !self.inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let msgid = self.inner.next_msgid.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = Envelope::request(method, msgid, payload)?;
        let deadline = timeout.map(|t| Instant::now() + t);

        self.inner.bus.register_pending(msgid, on_response, deadline)?;
        if let Err(err) = self.inner.transport.send(&envelope.encode()) {
            // Never issued: drop the entry without invoking the callback and
            // report synchronously instead.
            let _ = self.inner.bus.cancel_pending(msgid);
            return Err(err);
        }
        Ok(msgid)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// The dialed address.
    pub fn remote_addr(&self) -> Addr {
        self.inner.transport.local_addr()
    }

    /// Calls issued but not yet settled.
    pub fn pending_calls(&self) -> usize {
        self.inner.bus.pending_count()
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner.bus.stats()
    }

    pub fn clear_stats(&self) {
        self.inner.bus.clear_stats()
    }

    /// Tear the session down: close the transport and settle every pending
    /// call with `Cancelled`, each callback exactly once. Idempotent.
    pub fn disconnect(&self) {
        if let Some(task) = self.inner.deadline_task.lock().take() {
            task.abort();
        }
        self.inner.transport.shutdown();
        self.inner.bus.cancel_all_pending(Status::Cancelled);
    }
}

impl ClientInner {
    fn on_frame(&self, frame: Bytes) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                (self.on_error)(&Error::EnvelopeDecode(err));
                return;
            }
        };
        match envelope.kind {
            Kind::Response => self.bus.dispatch_response(&envelope),
            other => {
                (self.on_error)(&Error::UnexpectedKind(other));
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.deadline_task.lock().take() {
            task.abort();
        }
    }
}
