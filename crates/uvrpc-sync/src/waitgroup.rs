use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::{Promise, SyncError};

/// Non-negative counter with a completion promise.
///
/// The completion promise resolves the first time the counter returns to
/// zero after having been non-zero; later counter activity does not
/// un-resolve it.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<WgInner>,
}

struct WgInner {
    state: Mutex<WgState>,
    completion: Promise,
}

struct WgState {
    count: u64,
    /// The counter has been non-zero at least once.
    armed: bool,
}

impl WaitGroup {
    pub fn new(handle: &Handle) -> Self {
        Self {
            inner: Arc::new(WgInner {
                state: Mutex::new(WgState {
                    count: 0,
                    armed: false,
                }),
                completion: Promise::new(handle),
            }),
        }
    }

    /// Adjust the counter by `delta`.
    ///
    /// Negative deltas may not drive the counter below zero; that errors
    /// `InvalidParam` and leaves the counter unchanged.
    pub fn add(&self, delta: i64) -> Result<(), SyncError> {
        let mut state = self.inner.state.lock();
        let next = state.count as i64 + delta;
        if next < 0 {
            return Err(SyncError::InvalidParam("wait-group counter underflow"));
        }
        state.count = next as u64;
        if state.count > 0 {
            state.armed = true;
        } else if state.armed {
            // First return to zero settles the completion promise; the
            // resolve is a no-op on any later zero crossing.
            let _ = self.inner.completion.resolve(Bytes::new());
        }
        Ok(())
    }

    /// Equivalent to `add(-1)`.
    pub fn done(&self) -> Result<(), SyncError> {
        self.add(-1)
    }

    /// The completion promise (shared; all clones observe one settlement).
    pub fn promise(&self) -> Promise {
        self.inner.completion.clone()
    }

    pub fn count(&self) -> u64 {
        self.inner.state.lock().count
    }

    /// Whether the counter has ever been non-zero.
    pub(crate) fn armed(&self) -> bool {
        self.inner.state.lock().armed
    }
}
