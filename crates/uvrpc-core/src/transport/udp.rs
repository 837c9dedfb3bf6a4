//! Datagram transport over UDP.
//!
//! One socket, no accept. The listener maintains a peer table populated from
//! received datagram source addresses; `send` broadcasts to that table and
//! `send_to` answers a specific [`ReplyTarget::Datagram`]. Each datagram
//! carries one or more complete frames; a truncated packet is dropped whole
//! and reported, without affecting the session.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uvrpc_wire::{encode_frame, split_datagram};

use crate::transport::{ErrorFn, RecvFn, on_loop};
use crate::{Addr, Config, Error, ReplyTarget};

/// Largest UDP payload we will attempt to send.
const MAX_DATAGRAM: usize = 65_507;

const RECV_BUF: usize = 64 * 1024;

fn check_datagram_size(frame: &Bytes) -> Result<(), Error> {
    if frame.len() > MAX_DATAGRAM {
        return Err(Error::PayloadTooLarge {
            len: frame.len(),
            max: MAX_DATAGRAM,
        });
    }
    Ok(())
}

fn enqueue(
    tx: &mpsc::Sender<(Bytes, SocketAddr)>,
    frame: Bytes,
    peer: SocketAddr,
) -> Result<(), Error> {
    tx.try_send((frame, peer)).map_err(|err| match err {
        TrySendError::Full(_) => Error::QueueFull,
        TrySendError::Closed(_) => Error::InvalidState("transport closed"),
    })
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut rx: mpsc::Receiver<(Bytes, SocketAddr)>,
    on_error: ErrorFn,
) {
    while let Some((frame, peer)) = rx.recv().await {
        if let Err(err) = socket.send_to(&frame, peer).await {
            on_error(&Error::Io(err));
        }
    }
}

/// Server-role UDP transport.
#[derive(Clone)]
pub struct UdpListener {
    inner: Arc<UdpListenerInner>,
}

struct UdpListenerInner {
    handle: Handle,
    socket: Arc<UdpSocket>,
    local: Addr,
    peers: Mutex<HashSet<SocketAddr>>,
    out_tx: mpsc::Sender<(Bytes, SocketAddr)>,
    out_rx: Mutex<Option<mpsc::Receiver<(Bytes, SocketAddr)>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl UdpListener {
    pub(crate) async fn listen(config: &Config) -> Result<Self, Error> {
        let Addr::Udp(sa) = config.addr else {
            return Err(Error::InvalidParam("not a udp address"));
        };
        let socket = on_loop(&config.handle, async move { UdpSocket::bind(sa).await })
            .await?
            .map_err(Error::Bind)?;
        let local = Addr::Udp(socket.local_addr().map_err(Error::Bind)?);
        let (out_tx, out_rx) = mpsc::channel(config.snd_hwm);
        Ok(Self {
            inner: Arc::new(UdpListenerInner {
                handle: config.handle.clone(),
                socket: Arc::new(socket),
                local,
                peers: Mutex::new(HashSet::new()),
                out_tx,
                out_rx: Mutex::new(Some(out_rx)),
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn start(&self, on_recv: RecvFn, on_error: ErrorFn) -> Result<(), Error> {
        let out_rx = self
            .inner
            .out_rx
            .lock()
            .take()
            .ok_or(Error::InvalidState("transport already started"))?;

        let send_task = self.inner.handle.spawn(send_loop(
            self.inner.socket.clone(),
            out_rx,
            on_error.clone(),
        ));

        let inner = self.inner.clone();
        let recv_task = self.inner.handle.spawn(async move {
            let mut buf = vec![0u8; RECV_BUF];
            loop {
                match inner.socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        if inner.peers.lock().insert(from) {
                            tracing::debug!(peer = %from, "new udp peer");
                        }
                        match split_datagram(&buf[..n]) {
                            Ok(frames) => {
                                for frame in frames {
                                    on_recv(frame, ReplyTarget::Datagram(from));
                                }
                            }
                            Err(err) => on_error(&err.into()),
                        }
                    }
                    Err(err) => on_error(&Error::Io(err)),
                }
            }
        });

        self.inner.tasks.lock().extend([send_task, recv_task]);
        Ok(())
    }

    /// Broadcast one framed payload to every known peer.
    pub(crate) fn send(&self, body: &[u8]) -> Result<usize, Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidState("transport closed"));
        }
        let frame = encode_frame(body)?;
        check_datagram_size(&frame)?;
        let peers: Vec<SocketAddr> = self.inner.peers.lock().iter().copied().collect();
        let mut sent = 0;
        for peer in peers {
            match enqueue(&self.inner.out_tx, frame.clone(), peer) {
                Ok(()) => sent += 1,
                Err(err) => tracing::warn!(peer = %peer, error = %err, "broadcast skip"),
            }
        }
        Ok(sent)
    }

    pub(crate) fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        let ReplyTarget::Datagram(peer) = target else {
            return Err(Error::InvalidParam("target is not a datagram peer"));
        };
        let frame = encode_frame(body)?;
        check_datagram_size(&frame)?;
        enqueue(&self.inner.out_tx, frame, *peer)
    }

    pub(crate) fn peers(&self) -> Vec<ReplyTarget> {
        self.inner
            .peers
            .lock()
            .iter()
            .map(|peer| ReplyTarget::Datagram(*peer))
            .collect()
    }

    pub(crate) fn local_addr(&self) -> Addr {
        self.inner.local.clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.peers.lock().clear();
        tracing::debug!(addr = %self.inner.local, "udp listener shut down");
    }
}

/// Client-role UDP transport: one socket connected to one remote.
#[derive(Clone)]
pub struct UdpClient {
    inner: Arc<UdpClientInner>,
}

struct UdpClientInner {
    handle: Handle,
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    out_tx: mpsc::Sender<(Bytes, SocketAddr)>,
    out_rx: Mutex<Option<mpsc::Receiver<(Bytes, SocketAddr)>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl UdpClient {
    pub(crate) async fn connect(config: &Config) -> Result<Self, Error> {
        let Addr::Udp(remote) = config.addr else {
            return Err(Error::InvalidParam("not a udp address"));
        };
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| Error::InvalidParam("bind address"))?
        } else {
            "[::]:0".parse().map_err(|_| Error::InvalidParam("bind address"))?
        };
        let socket = on_loop(&config.handle, async move {
            let socket = UdpSocket::bind(bind_addr).await?;
            socket.connect(remote).await?;
            Ok::<_, std::io::Error>(socket)
        })
        .await?
        .map_err(Error::Connect)?;

        let (out_tx, out_rx) = mpsc::channel(config.snd_hwm);
        Ok(Self {
            inner: Arc::new(UdpClientInner {
                handle: config.handle.clone(),
                socket: Arc::new(socket),
                remote,
                out_tx,
                out_rx: Mutex::new(Some(out_rx)),
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn start(&self, on_recv: RecvFn, on_error: ErrorFn) -> Result<(), Error> {
        let out_rx = self
            .inner
            .out_rx
            .lock()
            .take()
            .ok_or(Error::InvalidState("transport already started"))?;

        let send_task = self.inner.handle.spawn(send_loop(
            self.inner.socket.clone(),
            out_rx,
            on_error.clone(),
        ));

        let inner = self.inner.clone();
        let recv_task = self.inner.handle.spawn(async move {
            let mut buf = vec![0u8; RECV_BUF];
            loop {
                match inner.socket.recv(&mut buf).await {
                    Ok(n) => match split_datagram(&buf[..n]) {
                        Ok(frames) => {
                            for frame in frames {
                                on_recv(frame, ReplyTarget::Datagram(inner.remote));
                            }
                        }
                        Err(err) => on_error(&err.into()),
                    },
                    Err(err) => on_error(&Error::Io(err)),
                }
            }
        });

        self.inner.tasks.lock().extend([send_task, recv_task]);
        Ok(())
    }

    pub(crate) fn send(&self, body: &[u8]) -> Result<usize, Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        let frame = encode_frame(body)?;
        check_datagram_size(&frame)?;
        enqueue(&self.inner.out_tx, frame, self.inner.remote)?;
        Ok(1)
    }

    pub(crate) fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        match target {
            ReplyTarget::Datagram(_) => self.send(body).map(|_| ()),
            _ => Err(Error::InvalidParam("target is not a datagram peer")),
        }
    }

    pub(crate) fn peers(&self) -> Vec<ReplyTarget> {
        vec![ReplyTarget::Datagram(self.inner.remote)]
    }

    pub(crate) fn local_addr(&self) -> Addr {
        Addr::Udp(self.inner.remote)
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!(remote = %self.inner.remote, "udp client shut down");
    }
}
