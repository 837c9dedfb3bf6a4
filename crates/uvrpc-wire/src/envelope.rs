use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{MAX_FRAME_LEN, WireError};

/// Longest method or topic name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Fixed envelope header: kind (1) + name length (1) + msgid (8) + status (4).
const FIXED_HEADER_LEN: usize = 14;

/// Largest payload an envelope with the given name can carry while its
/// encoding still fits in one frame.
pub fn envelope_payload_cap(name_len: usize) -> usize {
    MAX_FRAME_LEN - FIXED_HEADER_LEN - name_len
}

/// Envelope kind discriminant.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A call carrying a method name and a correlation id.
    Request = 1,
    /// The reply to a request, correlated by msgid.
    Response = 2,
    /// A topic broadcast; no correlation.
    Publication = 3,
    /// Subscriber announcing or retracting topic interest.
    SubscribeControl = 4,
}

impl Kind {
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            1 => Kind::Request,
            2 => Kind::Response,
            3 => Kind::Publication,
            4 => Kind::SubscribeControl,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Kind {
    type Error = WireError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Kind::from_u8(val).ok_or(WireError::InvalidKind(val))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Request => write!(f, "request"),
            Kind::Response => write!(f, "response"),
            Kind::Publication => write!(f, "publication"),
            Kind::SubscribeControl => write!(f, "subscribe-control"),
        }
    }
}

/// The structured message record that rides inside a frame.
///
/// `name` carries the method (requests, responses) or topic (publications,
/// subscribe control). `msgid` is 0 where correlation does not apply,
/// `status` is 0 except on responses. The payload is opaque.
///
/// Wire layout, big-endian throughout:
///
/// ```text
/// u8  kind
/// u8  name_len
///     name[name_len]
/// u64 msgid
/// i32 status
///     payload (remainder of the frame)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: Kind,
    pub name: String,
    pub msgid: u64,
    pub status: i32,
    pub payload: Bytes,
}

impl Envelope {
    /// Build a request envelope. `msgid` must be non-zero.
    pub fn request(
        method: impl Into<String>,
        msgid: u64,
        payload: Bytes,
    ) -> Result<Self, WireError> {
        Self::validated(Envelope {
            kind: Kind::Request,
            name: method.into(),
            msgid,
            status: 0,
            payload,
        })
    }

    /// Build a response envelope correlated to `msgid`.
    pub fn response(
        method: impl Into<String>,
        msgid: u64,
        status: i32,
        payload: Bytes,
    ) -> Result<Self, WireError> {
        Self::validated(Envelope {
            kind: Kind::Response,
            name: method.into(),
            msgid,
            status,
            payload,
        })
    }

    /// Build a publication envelope for `topic`.
    pub fn publication(topic: impl Into<String>, payload: Bytes) -> Result<Self, WireError> {
        Self::validated(Envelope {
            kind: Kind::Publication,
            name: topic.into(),
            msgid: 0,
            status: 0,
            payload,
        })
    }

    /// Build a subscribe-control envelope for `topic`.
    pub fn subscribe_control(topic: impl Into<String>, payload: Bytes) -> Result<Self, WireError> {
        Self::validated(Envelope {
            kind: Kind::SubscribeControl,
            name: topic.into(),
            msgid: 0,
            status: 0,
            payload,
        })
    }

    fn validated(env: Envelope) -> Result<Envelope, WireError> {
        if env.name.len() > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(env.name.len()));
        }
        let cap = envelope_payload_cap(env.name.len());
        if env.payload.len() > cap {
            return Err(WireError::PayloadTooLarge {
                len: env.payload.len(),
                max: cap,
            });
        }
        Ok(env)
    }

    /// Encoded length of this envelope.
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_LEN + self.name.len() + self.payload.len()
    }

    /// Serialize to the normative wire layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.name.len() as u8);
        buf.put_slice(self.name.as_bytes());
        buf.put_u64(self.msgid);
        buf.put_i32(self.status);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse an envelope from one frame body.
    ///
    /// The payload is a zero-copy slice of the input.
    pub fn decode(body: Bytes) -> Result<Envelope, WireError> {
        if body.len() < 2 {
            return Err(WireError::Truncated {
                have: body.len(),
                need: 2,
            });
        }
        let kind = Kind::try_from(body[0])?;
        let name_len = body[1] as usize;
        let need = FIXED_HEADER_LEN + name_len;
        if body.len() < need {
            return Err(WireError::Truncated {
                have: body.len(),
                need,
            });
        }
        let name = std::str::from_utf8(&body[2..2 + name_len])
            .map_err(|_| WireError::InvalidName)?
            .to_owned();
        let mut at = 2 + name_len;
        let msgid = u64::from_be_bytes(body[at..at + 8].try_into().unwrap());
        at += 8;
        let status = i32::from_be_bytes(body[at..at + 4].try_into().unwrap());
        at += 4;
        let payload = body.slice(at..);
        Ok(Envelope {
            kind,
            name,
            msgid,
            status,
            payload,
        })
    }
}
