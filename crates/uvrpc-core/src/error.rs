use std::fmt;
use std::io;

use uvrpc_wire::{Kind, Status, WireError};

/// Session-level error taxonomy.
///
/// Synchronously observable failures surface as `Err` returns; conditions
/// discovered by the event loop go to the session's error sink. Every
/// variant maps onto a wire [`Status`] via [`status`](Error::status).
#[derive(Debug)]
pub enum Error {
    /// Address string failed to parse (missing scheme, bad host, ...).
    InvalidAddress(String),

    /// Caller contract violated.
    InvalidParam(&'static str),

    /// Operation not valid in the current lifecycle state.
    InvalidState(&'static str),

    /// A name is already taken (handler method, in-proc address, msgid).
    AlreadyExists(String),

    /// Lookup miss.
    NotFound,

    /// Operation attempted before connect completed or after disconnect.
    NotConnected,

    /// Settled by session teardown.
    Cancelled,

    /// Deadline elapsed.
    Timeout,

    /// A peer's send queue is at its high-water mark.
    QueueFull,

    /// Payload exceeds what one frame can carry.
    PayloadTooLarge { len: usize, max: usize },

    /// Malformed frame on the wire.
    FrameInvalid(&'static str),

    /// Frame body did not decode as an envelope.
    EnvelopeDecode(WireError),

    /// Envelope kind not acceptable for this session role.
    UnexpectedKind(Kind),

    /// A peer connection was reset or closed abnormally.
    PeerReset(String),

    /// Listener could not bind.
    Bind(io::Error),

    /// Client could not connect.
    Connect(io::Error),

    /// Other I/O failure on an established transport.
    Io(io::Error),
}

impl Error {
    /// The wire status code this error reports as.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidAddress(_) | Error::InvalidParam(_) | Error::AlreadyExists(_) => {
                Status::InvalidParam
            }
            Error::NotFound => Status::NotFound,
            Error::NotConnected => Status::NotConnected,
            Error::Cancelled => Status::Cancelled,
            Error::Timeout => Status::Timeout,
            Error::InvalidState(_)
            | Error::QueueFull
            | Error::PayloadTooLarge { .. }
            | Error::FrameInvalid(_)
            | Error::EnvelopeDecode(_)
            | Error::UnexpectedKind(_)
            | Error::PeerReset(_)
            | Error::Bind(_)
            | Error::Connect(_)
            | Error::Io(_) => Status::Generic,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidAddress(reason) => write!(f, "invalid address: {}", reason),
            Error::InvalidParam(what) => write!(f, "invalid parameter: {}", what),
            Error::InvalidState(what) => write!(f, "invalid state: {}", what),
            Error::AlreadyExists(name) => write!(f, "already exists: {}", name),
            Error::NotFound => write!(f, "not found"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Timeout => write!(f, "timed out"),
            Error::QueueFull => write!(f, "send queue full"),
            Error::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds the {} byte cap", len, max)
            }
            Error::FrameInvalid(reason) => write!(f, "invalid frame: {}", reason),
            Error::EnvelopeDecode(err) => write!(f, "envelope decode failed: {}", err),
            Error::UnexpectedKind(kind) => write!(f, "unexpected envelope kind: {}", kind),
            Error::PeerReset(peer) => write!(f, "peer reset: {}", peer),
            Error::Bind(err) => write!(f, "bind failed: {}", err),
            Error::Connect(err) => write!(f, "connect failed: {}", err),
            Error::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(err) | Error::Connect(err) | Error::Io(err) => Some(err),
            Error::EnvelopeDecode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::PayloadTooLarge { len, max } => Error::PayloadTooLarge { len, max },
            WireError::FrameInvalid(reason) => Error::FrameInvalid(reason),
            other => Error::EnvelopeDecode(other),
        }
    }
}
