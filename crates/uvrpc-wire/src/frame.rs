use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Size of the length prefix preceding every frame body.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest frame body accepted on the wire (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Wrap one envelope's bytes in a length-prefixed frame.
///
/// The prefix is a big-endian `u32` of the body length; the prefix itself is
/// not counted. Empty bodies and bodies over [`MAX_FRAME_LEN`] are refused.
pub fn encode_frame(body: &[u8]) -> Result<Bytes, WireError> {
    if body.is_empty() {
        return Err(WireError::FrameInvalid("zero-length frame body"));
    }
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::PayloadTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Incremental frame parser for byte streams.
///
/// Bytes arrive in arbitrary chunks via [`push`](FrameDecoder::push);
/// [`next_frame`](FrameDecoder::next_frame) yields complete frame bodies as
/// contiguous `Bytes` slices. Unconsumed bytes stay in the reassembly buffer
/// verbatim, and the buffer's capacity is reused across frames.
///
/// A stream closing mid-frame is not a decoder error; the transport treats
/// the close as end-of-stream. An invalid length prefix leaves the buffer
/// untouched so the caller can tear the connection down.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append newly received bytes to the reassembly buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete frame body, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Errors
    /// [`WireError::FrameInvalid`] on a zero or oversize length prefix.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, WireError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len == 0 {
            return Err(WireError::FrameInvalid("zero length prefix"));
        }
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameInvalid("length prefix exceeds 16 MiB"));
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Bytes currently held awaiting a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Decode the complete frames packed in one datagram.
///
/// A datagram carries one or more whole frames; trailing garbage or a
/// truncated frame invalidates the entire packet.
pub fn split_datagram(packet: &[u8]) -> Result<Vec<Bytes>, WireError> {
    let mut frames = Vec::new();
    let mut rest = packet;
    while !rest.is_empty() {
        if rest.len() < FRAME_HEADER_LEN {
            return Err(WireError::FrameInvalid("truncated datagram length prefix"));
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if len == 0 {
            return Err(WireError::FrameInvalid("zero length prefix"));
        }
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameInvalid("length prefix exceeds 16 MiB"));
        }
        if rest.len() < FRAME_HEADER_LEN + len {
            return Err(WireError::FrameInvalid("truncated datagram frame body"));
        }
        frames.push(Bytes::copy_from_slice(
            &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len],
        ));
        rest = &rest[FRAME_HEADER_LEN + len..];
    }
    if frames.is_empty() {
        return Err(WireError::FrameInvalid("empty datagram"));
    }
    Ok(frames)
}
