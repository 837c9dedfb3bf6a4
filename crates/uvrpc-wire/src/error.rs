use std::fmt;

/// Errors produced by the frame and envelope codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame body would exceed the 16 MiB cap.
    PayloadTooLarge { len: usize, max: usize },

    /// A length prefix or datagram was malformed: zero length, oversize
    /// length, or a truncated body.
    FrameInvalid(&'static str),

    /// Method or topic name exceeds 255 bytes.
    NameTooLong(usize),

    /// Envelope bytes ended before the fixed header was complete.
    Truncated { have: usize, need: usize },

    /// Unknown envelope kind byte.
    InvalidKind(u8),

    /// Method or topic name was not valid UTF-8.
    InvalidName,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds the {} byte cap", len, max)
            }
            WireError::FrameInvalid(reason) => write!(f, "invalid frame: {}", reason),
            WireError::NameTooLong(len) => {
                write!(f, "method/topic name of {} bytes exceeds 255", len)
            }
            WireError::Truncated { have, need } => {
                write!(f, "envelope truncated: have {} bytes, need {}", have, need)
            }
            WireError::InvalidKind(b) => write!(f, "unknown envelope kind byte: {}", b),
            WireError::InvalidName => write!(f, "method/topic name is not valid UTF-8"),
        }
    }
}

impl std::error::Error for WireError {}
