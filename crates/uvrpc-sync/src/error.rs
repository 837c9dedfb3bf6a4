use std::fmt;

/// Misuse and lifecycle errors for the coordination primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// Operation not valid for the primitive's current state, e.g. settling
    /// an already-settled promise or registering a second terminal callback.
    InvalidState(&'static str),

    /// Caller contract violated, e.g. a wait-group counter underflow.
    InvalidParam(&'static str),

    /// A bounded wait elapsed before completion.
    Timeout,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::InvalidState(what) => write!(f, "invalid state: {}", what),
            SyncError::InvalidParam(what) => write!(f, "invalid parameter: {}", what),
            SyncError::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for SyncError {}
