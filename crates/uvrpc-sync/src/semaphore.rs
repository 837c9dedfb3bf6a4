use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use uvrpc_wire::Status;

use crate::{Promise, SyncError};

/// Counted permits with a FIFO queue of waiter promises.
///
/// [`acquire_async`](Semaphore::acquire_async) either consumes a permit and
/// resolves the caller's promise right away (deferred through the promise's
/// wake handle) or enqueues the promise. [`release`](Semaphore::release)
/// hands the freed permit straight to the oldest waiter without touching the
/// counter, so wakeups are strictly first-in first-out.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Mutex<SemState>>,
}

struct SemState {
    permits: usize,
    waiters: VecDeque<Promise>,
    closed: bool,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SemState {
                permits,
                waiters: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Acquire a permit asynchronously.
    ///
    /// `promise` is resolved (with an empty payload) once a permit is held:
    /// immediately if one is free, otherwise when a release reaches this
    /// waiter's queue position. The promise must be pending and unsettled.
    pub fn acquire_async(&self, promise: &Promise) -> Result<(), SyncError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(SyncError::InvalidState("semaphore closed"));
        }
        if state.permits > 0 {
            state.permits -= 1;
            drop(state);
            if let Err(e) = promise.resolve(Bytes::new()) {
                // The caller handed us a settled promise; give the permit back.
                self.inner.lock().permits += 1;
                return Err(e);
            }
            return Ok(());
        }
        state.waiters.push_back(promise.clone());
        Ok(())
    }

    /// Release one permit.
    ///
    /// If waiters are queued the oldest live one is resolved and the permit
    /// count is left unchanged; otherwise the count is incremented.
    pub fn release(&self) {
        let mut state = self.inner.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.resolve(Bytes::new()).is_ok() {
                return;
            }
            // Waiter was settled elsewhere; skip it and keep the permit moving.
        }
        state.permits += 1;
    }

    /// Synchronous best-effort acquire.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.inner.lock();
        if state.closed || state.permits == 0 {
            return false;
        }
        state.permits -= 1;
        true
    }

    /// Reject every queued waiter and refuse further acquires.
    pub fn close(&self) {
        let waiters = {
            let mut state = self.inner.lock();
            state.closed = true;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            tracing::debug!(waiters = waiters.len(), "semaphore closed with queued waiters");
        }
        for waiter in waiters {
            let _ = waiter.reject(Status::Generic, "semaphore closed while waiting");
        }
    }

    pub fn permits(&self) -> usize {
        self.inner.lock().permits
    }

    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}
