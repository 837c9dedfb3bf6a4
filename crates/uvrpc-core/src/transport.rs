//! Transport facade.
//!
//! The public surface is the [`Transport`] enum; each backend lives in its
//! own module and the facade forwards with plain matches. A transport is
//! built in two phases: [`listen`](Transport::listen) /
//! [`connect`](Transport::connect) acquire the endpoint on the injected
//! runtime, then [`start`](Transport::start) installs the receive and error
//! callbacks and spawns the I/O loops. Nothing is delivered before `start`;
//! frames arriving in between wait in socket or channel buffers.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::{Addr, Config, Error, ReplyTarget};

pub mod inproc;
pub mod stream;
pub mod udp;

/// Delivery callback: one complete frame body plus the originating peer.
pub type RecvFn = Arc<dyn Fn(Bytes, ReplyTarget) + Send + Sync + 'static>;

/// Sink for non-fatal transport conditions.
pub type ErrorFn = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

/// Run a future on the injected loop and await its output.
///
/// All I/O resources must be acquired on the session's runtime so their
/// reactor registration lives there, whatever runtime the caller awaits on.
pub(crate) async fn on_loop<T, F>(handle: &Handle, fut: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    handle
        .spawn(fut)
        .await
        .map_err(|_| Error::InvalidState("event loop unavailable"))
}

/// Uniform interface over the transport families, in listener or client
/// role. Cheap to clone; clones share the underlying endpoint.
#[derive(Clone)]
pub enum Transport {
    StreamListener(stream::StreamListener),
    StreamClient(stream::StreamClient),
    UdpListener(udp::UdpListener),
    UdpClient(udp::UdpClient),
    InprocListener(inproc::InprocListener),
    InprocClient(inproc::InprocClient),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            Transport::StreamListener(_) | Transport::UdpListener(_) | Transport::InprocListener(_) => {
                "listener"
            }
            _ => "client",
        };
        f.debug_struct("Transport")
            .field("addr", &self.local_addr())
            .field("role", &role)
            .finish()
    }
}

impl Transport {
    /// Bind a listener-role transport for the configured address.
    pub async fn listen(config: &Config) -> Result<Transport, Error> {
        match &config.addr {
            Addr::Tcp(_) | Addr::Ipc(_) => Ok(Transport::StreamListener(
                stream::StreamListener::listen(config).await?,
            )),
            Addr::Udp(_) => Ok(Transport::UdpListener(udp::UdpListener::listen(config).await?)),
            Addr::Inproc(_) => Ok(Transport::InprocListener(inproc::InprocListener::listen(
                config,
            )?)),
        }
    }

    /// Establish a client-role transport. Resolves once connected.
    pub async fn connect(config: &Config) -> Result<Transport, Error> {
        match &config.addr {
            Addr::Tcp(_) | Addr::Ipc(_) => Ok(Transport::StreamClient(
                stream::StreamClient::connect(config).await?,
            )),
            Addr::Udp(_) => Ok(Transport::UdpClient(udp::UdpClient::connect(config).await?)),
            Addr::Inproc(_) => Ok(Transport::InprocClient(inproc::InprocClient::connect(
                config,
            )?)),
        }
    }

    /// Install callbacks and spawn the I/O loops. One-shot.
    pub fn start(&self, on_recv: RecvFn, on_error: ErrorFn) -> Result<(), Error> {
        match self {
            Transport::StreamListener(t) => t.start(on_recv, on_error),
            Transport::StreamClient(t) => t.start(on_recv, on_error),
            Transport::UdpListener(t) => t.start(on_recv, on_error),
            Transport::UdpClient(t) => t.start(on_recv, on_error),
            Transport::InprocListener(t) => t.start(on_recv, on_error),
            Transport::InprocClient(t) => t.start(on_recv, on_error),
        }
    }

    /// Send one payload, wrapped in one frame, to every current peer.
    /// Returns the number of peers the frame was queued for.
    pub fn send(&self, body: &[u8]) -> Result<usize, Error> {
        match self {
            Transport::StreamListener(t) => t.send(body),
            Transport::StreamClient(t) => t.send(body),
            Transport::UdpListener(t) => t.send(body),
            Transport::UdpClient(t) => t.send(body),
            Transport::InprocListener(t) => t.send(body),
            Transport::InprocClient(t) => t.send(body),
        }
    }

    /// Addressed send to one peer previously seen in a receive dispatch.
    pub fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        match self {
            Transport::StreamListener(t) => t.send_to(body, target),
            Transport::StreamClient(t) => t.send_to(body, target),
            Transport::UdpListener(t) => t.send_to(body, target),
            Transport::UdpClient(t) => t.send_to(body, target),
            Transport::InprocListener(t) => t.send_to(body, target),
            Transport::InprocClient(t) => t.send_to(body, target),
        }
    }

    /// The current peer set.
    pub fn peers(&self) -> Vec<ReplyTarget> {
        match self {
            Transport::StreamListener(t) => t.peers(),
            Transport::StreamClient(t) => t.peers(),
            Transport::UdpListener(t) => t.peers(),
            Transport::UdpClient(t) => t.peers(),
            Transport::InprocListener(t) => t.peers(),
            Transport::InprocClient(t) => t.peers(),
        }
    }

    /// The bound (listener) or dialed (client) address. For `:0` binds this
    /// carries the actual port.
    pub fn local_addr(&self) -> Addr {
        match self {
            Transport::StreamListener(t) => t.local_addr(),
            Transport::StreamClient(t) => t.local_addr(),
            Transport::UdpListener(t) => t.local_addr(),
            Transport::UdpClient(t) => t.local_addr(),
            Transport::InprocListener(t) => t.local_addr(),
            Transport::InprocClient(t) => t.local_addr(),
        }
    }

    pub fn is_listener(&self) -> bool {
        matches!(
            self,
            Transport::StreamListener(_) | Transport::UdpListener(_) | Transport::InprocListener(_)
        )
    }

    /// Whether the transport can currently send: listeners while open,
    /// clients while the connection is up.
    pub fn is_connected(&self) -> bool {
        match self {
            Transport::StreamListener(t) => t.is_open(),
            Transport::StreamClient(t) => t.is_connected(),
            Transport::UdpListener(t) => t.is_open(),
            Transport::UdpClient(t) => t.is_connected(),
            Transport::InprocListener(t) => t.is_open(),
            Transport::InprocClient(t) => t.is_connected(),
        }
    }

    /// Stop the I/O loops, close handles, release peers. Idempotent. The
    /// injected runtime itself is never touched.
    pub fn shutdown(&self) {
        match self {
            Transport::StreamListener(t) => t.shutdown(),
            Transport::StreamClient(t) => t.shutdown(),
            Transport::UdpListener(t) => t.shutdown(),
            Transport::UdpClient(t) => t.shutdown(),
            Transport::InprocListener(t) => t.shutdown(),
            Transport::InprocClient(t) => t.shutdown(),
        }
    }
}
