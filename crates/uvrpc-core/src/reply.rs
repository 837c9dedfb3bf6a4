use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use uvrpc_wire::{Envelope, Status};

use crate::{Error, Transport};

/// Opaque identifier of the peer a frame came from, usable for addressed
/// sends on the same transport.
///
/// Stream transports hand out connection ids, datagram transports the
/// sender's socket address, and the in-process transport its registry peer
/// id. Response routing never fabricates stream handles for datagram peers;
/// it dispatches on the variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReplyTarget {
    /// An accepted (or dialed) stream connection.
    Stream(u64),
    /// A datagram peer, identified by source address.
    Datagram(SocketAddr),
    /// An in-process registry peer.
    Inproc(u64),
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyTarget::Stream(id) => write!(f, "stream#{}", id),
            ReplyTarget::Datagram(addr) => write!(f, "datagram:{}", addr),
            ReplyTarget::Inproc(id) => write!(f, "inproc#{}", id),
        }
    }
}

/// One-shot response channel handed to request handlers.
///
/// A sink is bound to the originating peer and msgid; consuming it with
/// [`send`](ReplySink::send) produces exactly one response. Dropping an
/// unconsumed sink leaves the caller's pending entry to its timeout and is
/// logged as a warning.
pub struct ReplySink {
    inner: Option<SinkInner>,
}

struct SinkInner {
    transport: Transport,
    target: ReplyTarget,
    method: String,
    msgid: u64,
}

impl ReplySink {
    /// Bind a sink to a peer and msgid. Normally constructed by the server
    /// session while routing a request.
    pub fn new(transport: Transport, target: ReplyTarget, method: String, msgid: u64) -> Self {
        Self {
            inner: Some(SinkInner {
                transport,
                target,
                method,
                msgid,
            }),
        }
    }

    /// The peer this sink answers to.
    pub fn peer(&self) -> &ReplyTarget {
        // The inner is only vacated by `send`, which consumes self.
        &self
            .inner
            .as_ref()
            .unwrap_or_else(|| unreachable!("reply sink accessed after send"))
            .target
    }

    /// The correlation id of the request being answered.
    pub fn msgid(&self) -> u64 {
        self.inner
            .as_ref()
            .unwrap_or_else(|| unreachable!("reply sink accessed after send"))
            .msgid
    }

    /// Produce the response and consume the sink.
    pub fn send(mut self, status: Status, payload: Bytes) -> Result<(), Error> {
        let inner = self
            .inner
            .take()
            .unwrap_or_else(|| unreachable!("reply sink consumed twice"));
        let envelope = Envelope::response(inner.method, inner.msgid, status.code(), payload)?;
        inner.transport.send_to(&envelope.encode(), &inner.target)?;
        Ok(())
    }
}

impl Drop for ReplySink {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            tracing::warn!(
                method = %inner.method,
                msgid = inner.msgid,
                peer = %inner.target,
                "request handler dropped its reply sink without responding"
            );
        }
    }
}

impl fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("ReplySink")
                .field("peer", &inner.target)
                .field("method", &inner.method)
                .field("msgid", &inner.msgid)
                .finish(),
            None => f.debug_struct("ReplySink").field("sent", &true).finish(),
        }
    }
}
