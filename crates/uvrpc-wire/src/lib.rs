//! Wire-level types for uvrpc.
//!
//! Everything that crosses a transport boundary is defined here:
//!
//! - [`Envelope`]: the structured message record (kind, method/topic name,
//!   message id, status, opaque payload) and its byte encoding.
//! - Frame codec: the 4-byte big-endian length prefix that packages one
//!   envelope per frame, with [`FrameDecoder`] for partial-read reassembly
//!   over streams and [`split_datagram`] for packet transports.
//! - [`Status`]: the bit-exact result code table shared by responses,
//!   callbacks, and promise rejections.
//!
//! Payloads are opaque byte sequences; serialization of payload contents is
//! the caller's business.

mod envelope;
mod error;
mod frame;
mod status;

pub use envelope::{Envelope, Kind, MAX_NAME_LEN, envelope_payload_cap};
pub use error::WireError;
pub use frame::{FRAME_HEADER_LEN, FrameDecoder, MAX_FRAME_LEN, encode_frame, split_datagram};
pub use status::Status;
