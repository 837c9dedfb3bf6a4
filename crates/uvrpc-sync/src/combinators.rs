use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use uvrpc_wire::Status;

use crate::{Promise, Settlement, SyncError};

/// Resolve with the concatenation of every child payload, in input order,
/// once all children fulfill; reject as soon as any child rejects,
/// forwarding its code and message.
///
/// An empty input resolves immediately with an empty payload. The children's
/// terminal callback slots are consumed; a child that already has a callback
/// registered errors `InvalidState`.
pub fn all(handle: &Handle, children: &[Promise]) -> Result<Promise, SyncError> {
    let combined = Promise::new(handle);
    if children.is_empty() {
        let _ = combined.resolve(Bytes::new());
        return Ok(combined);
    }

    struct AllState {
        slots: Vec<Option<Bytes>>,
        remaining: usize,
        failed: bool,
    }
    let state = Arc::new(Mutex::new(AllState {
        slots: vec![None; children.len()],
        remaining: children.len(),
        failed: false,
    }));

    for (index, child) in children.iter().enumerate() {
        let state = state.clone();
        let combined = combined.clone();
        child.then(move |settlement| match settlement {
            Settlement::Fulfilled(payload) => {
                let mut s = state.lock();
                if s.failed {
                    return;
                }
                s.slots[index] = Some(payload);
                s.remaining -= 1;
                if s.remaining == 0 {
                    let mut buf = BytesMut::new();
                    for slot in s.slots.drain(..) {
                        if let Some(payload) = slot {
                            buf.extend_from_slice(&payload);
                        }
                    }
                    drop(s);
                    let _ = combined.resolve(buf.freeze());
                }
            }
            Settlement::Rejected { code, message } => {
                let mut s = state.lock();
                if s.failed {
                    return;
                }
                s.failed = true;
                drop(s);
                let _ = combined.reject(code, message);
            }
        })?;
    }
    Ok(combined)
}

/// Settle with the outcome of the first child to settle, fulfilled or
/// rejected.
///
/// An empty input never settles.
pub fn race(handle: &Handle, children: &[Promise]) -> Result<Promise, SyncError> {
    let combined = Promise::new(handle);
    for child in children {
        let combined = combined.clone();
        child.then(move |settlement| {
            // Only the first settlement lands; later ones hit InvalidState.
            let _ = match settlement {
                Settlement::Fulfilled(payload) => combined.resolve(payload),
                Settlement::Rejected { code, message } => combined.reject(code, message),
            };
        })?;
    }
    Ok(combined)
}

/// Resolve once every child has settled, fulfilled or rejected.
///
/// The combined payload is the [`SettledList`] encoding of each child's
/// outcome in input order. An empty input resolves immediately.
pub fn all_settled(handle: &Handle, children: &[Promise]) -> Result<Promise, SyncError> {
    let combined = Promise::new(handle);
    if children.is_empty() {
        let _ = combined.resolve(SettledList(Vec::new()).encode());
        return Ok(combined);
    }

    struct SettledState {
        slots: Vec<Option<Settlement>>,
        remaining: usize,
    }
    let state = Arc::new(Mutex::new(SettledState {
        slots: vec![None; children.len()],
        remaining: children.len(),
    }));

    for (index, child) in children.iter().enumerate() {
        let state = state.clone();
        let combined = combined.clone();
        child.then(move |settlement| {
            let mut s = state.lock();
            s.slots[index] = Some(settlement);
            s.remaining -= 1;
            if s.remaining == 0 {
                let entries = s
                    .slots
                    .drain(..)
                    .map(|slot| match slot {
                        Some(Settlement::Fulfilled(payload)) => SettledEntry::Fulfilled(payload),
                        Some(Settlement::Rejected { code, message }) => {
                            SettledEntry::Rejected { code, message }
                        }
                        None => SettledEntry::Rejected {
                            code: Status::Generic,
                            message: String::new(),
                        },
                    })
                    .collect();
                drop(s);
                let _ = combined.resolve(SettledList(entries).encode());
            }
        })?;
    }
    Ok(combined)
}

/// One child outcome inside an [`all_settled`] payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettledEntry {
    Fulfilled(Bytes),
    Rejected { code: Status, message: String },
}

/// The `all_settled` payload: per child, in input order, a status byte
/// (1 fulfilled / 0 rejected), for rejections a big-endian `i32` code, then
/// a big-endian `u32` length and the payload or UTF-8 error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledList(pub Vec<SettledEntry>);

impl SettledList {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for entry in &self.0 {
            match entry {
                SettledEntry::Fulfilled(payload) => {
                    buf.put_u8(1);
                    buf.put_u32(payload.len() as u32);
                    buf.put_slice(payload);
                }
                SettledEntry::Rejected { code, message } => {
                    buf.put_u8(0);
                    buf.put_i32(code.code());
                    buf.put_u32(message.len() as u32);
                    buf.put_slice(message.as_bytes());
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, SyncError> {
        use bytes::Buf;

        let mut entries = Vec::new();
        while bytes.has_remaining() {
            if bytes.remaining() < 1 {
                return Err(SyncError::InvalidParam("truncated settled list"));
            }
            let flag = bytes.get_u8();
            match flag {
                1 => {
                    if bytes.remaining() < 4 {
                        return Err(SyncError::InvalidParam("truncated settled list"));
                    }
                    let len = bytes.get_u32() as usize;
                    if bytes.remaining() < len {
                        return Err(SyncError::InvalidParam("truncated settled list"));
                    }
                    entries.push(SettledEntry::Fulfilled(bytes.split_to(len)));
                }
                0 => {
                    if bytes.remaining() < 8 {
                        return Err(SyncError::InvalidParam("truncated settled list"));
                    }
                    let code = Status::from_code(bytes.get_i32());
                    let len = bytes.get_u32() as usize;
                    if bytes.remaining() < len {
                        return Err(SyncError::InvalidParam("truncated settled list"));
                    }
                    let message = String::from_utf8(bytes.split_to(len).to_vec())
                        .map_err(|_| SyncError::InvalidParam("settled list message not UTF-8"))?;
                    entries.push(SettledEntry::Rejected { code, message });
                }
                _ => return Err(SyncError::InvalidParam("bad settled list flag")),
            }
        }
        Ok(SettledList(entries))
    }
}
