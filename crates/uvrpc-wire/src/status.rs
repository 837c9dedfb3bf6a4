use std::fmt;

/// Result code carried by response envelopes and delivered to call
/// callbacks and promise rejections.
///
/// The numeric values are wire-stable: 0 is success, negative values are
/// failure kinds. Application handlers may reply with their own codes;
/// those ride through as [`Status::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Success.
    Ok,
    /// Unclassified failure.
    Generic,
    /// Caller contract violated.
    InvalidParam,
    /// Allocation failed.
    NoMemory,
    /// Server has no handler for the requested method.
    MethodNotFound,
    /// Pending call deadline exceeded.
    Timeout,
    /// Lookup miss.
    NotFound,
    /// Operation attempted before connect completed.
    NotConnected,
    /// Session torn down before settlement.
    Cancelled,
    /// Application-defined code.
    Other(i32),
}

impl Status {
    /// Wire representation of this status.
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Generic => -1,
            Status::InvalidParam => -2,
            Status::NoMemory => -3,
            Status::MethodNotFound => -4,
            Status::Timeout => -5,
            Status::NotFound => -6,
            Status::NotConnected => -7,
            Status::Cancelled => -8,
            Status::Other(code) => code,
        }
    }

    /// Decode a wire status code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            -1 => Status::Generic,
            -2 => Status::InvalidParam,
            -3 => Status::NoMemory,
            -4 => Status::MethodNotFound,
            -5 => Status::Timeout,
            -6 => Status::NotFound,
            -7 => Status::NotConnected,
            -8 => Status::Cancelled,
            other => Status::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Generic => write!(f, "generic failure"),
            Status::InvalidParam => write!(f, "invalid parameter"),
            Status::NoMemory => write!(f, "out of memory"),
            Status::MethodNotFound => write!(f, "method not found"),
            Status::Timeout => write!(f, "timeout"),
            Status::NotFound => write!(f, "not found"),
            Status::NotConnected => write!(f, "not connected"),
            Status::Cancelled => write!(f, "cancelled"),
            Status::Other(code) => write!(f, "application status {}", code),
        }
    }
}
