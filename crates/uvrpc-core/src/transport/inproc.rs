//! In-process transport.
//!
//! A process-global registry maps in-proc address names to listener queues,
//! the only shared mutable state in the library. `connect` registers the
//! client's receive queue under a fresh peer id; sends enqueue a copy of the
//! envelope bytes into the opposite side's queue. Delivery always goes
//! through a bounded channel drained by a task on the *receiver's* runtime
//! handle, so a handler never runs inside the sender's call stack and
//! cross-runtime delivery lands on the right loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::transport::{ErrorFn, RecvFn};
use crate::{Addr, Config, Error, ReplyTarget};

/// Peer id the listener appears as from the client side. Client peer ids
/// start at 1.
const SERVER_PEER: u64 = 0;

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Shared>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<Shared>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// State shared between one listener and its connected clients.
struct Shared {
    name: String,
    server_tx: mpsc::Sender<(Bytes, u64)>,
    peers: Mutex<HashMap<u64, mpsc::Sender<Bytes>>>,
    next_peer: AtomicU64,
}

fn map_send_err<T>(err: TrySendError<T>, what: &'static str) -> Error {
    match err {
        TrySendError::Full(_) => Error::QueueFull,
        TrySendError::Closed(_) => Error::PeerReset(what.to_owned()),
    }
}

/// Server-role in-proc transport.
#[derive(Clone)]
pub struct InprocListener {
    inner: Arc<InprocListenerInner>,
}

struct InprocListenerInner {
    handle: Handle,
    shared: Arc<Shared>,
    server_rx: Mutex<Option<mpsc::Receiver<(Bytes, u64)>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl InprocListener {
    pub(crate) fn listen(config: &Config) -> Result<Self, Error> {
        let Addr::Inproc(name) = &config.addr else {
            return Err(Error::InvalidParam("not an inproc address"));
        };
        let (server_tx, server_rx) = mpsc::channel(config.rcv_hwm);
        let shared = Arc::new(Shared {
            name: name.clone(),
            server_tx,
            peers: Mutex::new(HashMap::new()),
            next_peer: AtomicU64::new(1),
        });

        {
            let mut reg = registry().lock();
            if reg.contains_key(name) {
                return Err(Error::AlreadyExists(format!("inproc://{}", name)));
            }
            reg.insert(name.clone(), shared.clone());
        }
        tracing::debug!(name = %name, "inproc listener registered");

        Ok(Self {
            inner: Arc::new(InprocListenerInner {
                handle: config.handle.clone(),
                shared,
                server_rx: Mutex::new(Some(server_rx)),
                task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn start(&self, on_recv: RecvFn, _on_error: ErrorFn) -> Result<(), Error> {
        let mut server_rx = self
            .inner
            .server_rx
            .lock()
            .take()
            .ok_or(Error::InvalidState("transport already started"))?;
        let task = self.inner.handle.spawn(async move {
            while let Some((bytes, peer_id)) = server_rx.recv().await {
                on_recv(bytes, ReplyTarget::Inproc(peer_id));
            }
        });
        *self.inner.task.lock() = Some(task);
        Ok(())
    }

    /// Enqueue a copy of the payload to every connected client.
    pub(crate) fn send(&self, body: &[u8]) -> Result<usize, Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidState("transport closed"));
        }
        let bytes = Bytes::copy_from_slice(body);
        let senders: Vec<(u64, mpsc::Sender<Bytes>)> = self
            .inner
            .shared
            .peers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        let mut sent = 0;
        for (peer_id, tx) in senders {
            match tx.try_send(bytes.clone()) {
                Ok(()) => sent += 1,
                Err(err) => {
                    let err = map_send_err(err, "inproc peer");
                    tracing::warn!(peer = peer_id, error = %err, "broadcast skip");
                }
            }
        }
        Ok(sent)
    }

    pub(crate) fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        let ReplyTarget::Inproc(peer_id) = target else {
            return Err(Error::InvalidParam("target is not an inproc peer"));
        };
        let tx = self
            .inner
            .shared
            .peers
            .lock()
            .get(peer_id)
            .cloned()
            .ok_or(Error::NotFound)?;
        tx.try_send(Bytes::copy_from_slice(body))
            .map_err(|err| map_send_err(err, "inproc peer"))
    }

    pub(crate) fn peers(&self) -> Vec<ReplyTarget> {
        self.inner
            .shared
            .peers
            .lock()
            .keys()
            .map(|id| ReplyTarget::Inproc(*id))
            .collect()
    }

    pub(crate) fn local_addr(&self) -> Addr {
        Addr::Inproc(self.inner.shared.name.clone())
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        unregister(&self.inner.shared);
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        self.inner.shared.peers.lock().clear();
        tracing::debug!(name = %self.inner.shared.name, "inproc listener shut down");
    }
}

fn unregister(shared: &Arc<Shared>) {
    let mut reg = registry().lock();
    // Only remove our own registration; the name may have been re-bound.
    if reg
        .get(&shared.name)
        .is_some_and(|current| Arc::ptr_eq(current, shared))
    {
        reg.remove(&shared.name);
    }
}

impl Drop for InprocListenerInner {
    fn drop(&mut self) {
        unregister(&self.shared);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Client-role in-proc transport.
#[derive(Clone)]
pub struct InprocClient {
    inner: Arc<InprocClientInner>,
}

struct InprocClientInner {
    handle: Handle,
    shared: Arc<Shared>,
    peer_id: u64,
    rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl InprocClient {
    pub(crate) fn connect(config: &Config) -> Result<Self, Error> {
        let Addr::Inproc(name) = &config.addr else {
            return Err(Error::InvalidParam("not an inproc address"));
        };
        let shared = registry().lock().get(name).cloned().ok_or_else(|| {
            Error::Connect(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no inproc listener at {:?}", name),
            ))
        })?;

        let (tx, rx) = mpsc::channel(config.rcv_hwm);
        let peer_id = shared.next_peer.fetch_add(1, Ordering::Relaxed);
        shared.peers.lock().insert(peer_id, tx);
        tracing::debug!(name = %name, peer = peer_id, "inproc client connected");

        Ok(Self {
            inner: Arc::new(InprocClientInner {
                handle: config.handle.clone(),
                shared,
                peer_id,
                rx: Mutex::new(Some(rx)),
                task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn start(&self, on_recv: RecvFn, _on_error: ErrorFn) -> Result<(), Error> {
        let mut rx = self
            .inner
            .rx
            .lock()
            .take()
            .ok_or(Error::InvalidState("transport already started"))?;
        let task = self.inner.handle.spawn(async move {
            while let Some(bytes) = rx.recv().await {
                on_recv(bytes, ReplyTarget::Inproc(SERVER_PEER));
            }
        });
        *self.inner.task.lock() = Some(task);
        Ok(())
    }

    pub(crate) fn send(&self, body: &[u8]) -> Result<usize, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner
            .shared
            .server_tx
            .try_send((Bytes::copy_from_slice(body), self.inner.peer_id))
            .map_err(|err| map_send_err(err, "inproc listener"))?;
        Ok(1)
    }

    pub(crate) fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        match target {
            ReplyTarget::Inproc(_) => self.send(body).map(|_| ()),
            _ => Err(Error::InvalidParam("target is not an inproc peer")),
        }
    }

    pub(crate) fn peers(&self) -> Vec<ReplyTarget> {
        vec![ReplyTarget::Inproc(SERVER_PEER)]
    }

    pub(crate) fn local_addr(&self) -> Addr {
        Addr::Inproc(self.inner.shared.name.clone())
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shared.peers.lock().remove(&self.inner.peer_id);
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        tracing::debug!(
            name = %self.inner.shared.name,
            peer = self.inner.peer_id,
            "inproc client disconnected"
        );
    }
}

impl Drop for InprocClientInner {
    fn drop(&mut self) {
        self.shared.peers.lock().remove(&self.peer_id);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
