use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use uvrpc_wire::Status;

use crate::SyncError;

type Callback = Box<dyn FnOnce(Settlement) + Send + 'static>;

/// Terminal outcome of a promise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Fulfilled(Bytes),
    Rejected { code: Status, message: String },
}

impl Settlement {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled(_))
    }
}

/// A value-or-error cell settled exactly once.
///
/// A promise starts pending and transitions once to fulfilled (with a
/// payload) or rejected (with a status code and message). One terminal
/// callback may be registered with [`then`](Promise::then); it is invoked
/// exactly once per promise lifetime, always from a task spawned on the
/// promise's handle, never from inside `resolve` or `reject`.
///
/// Cloning is shallow: clones share the same cell.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<Inner>,
}

struct Inner {
    handle: Handle,
    state: Mutex<State>,
}

struct State {
    outcome: Option<Settlement>,
    callback: Option<Callback>,
    /// A callback has been registered at some point (even if already run).
    callback_registered: bool,
    /// The callback has been handed to the wake handle.
    dispatched: bool,
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Promise")
            .field("outcome", &state.outcome)
            .field("callback_registered", &state.callback_registered)
            .finish()
    }
}

impl Promise {
    /// Create a pending promise bound to `handle`.
    pub fn new(handle: &Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle: handle.clone(),
                state: Mutex::new(State {
                    outcome: None,
                    callback: None,
                    callback_registered: false,
                    dispatched: false,
                }),
            }),
        }
    }

    /// Transition `Pending -> Fulfilled` and schedule the callback.
    ///
    /// Errors `InvalidState` if the promise is already settled.
    pub fn resolve(&self, payload: Bytes) -> Result<(), SyncError> {
        self.settle(Settlement::Fulfilled(payload))
    }

    /// Transition `Pending -> Rejected` and schedule the callback.
    ///
    /// Errors `InvalidState` if the promise is already settled.
    pub fn reject(&self, code: Status, message: impl Into<String>) -> Result<(), SyncError> {
        self.settle(Settlement::Rejected {
            code,
            message: message.into(),
        })
    }

    fn settle(&self, settlement: Settlement) -> Result<(), SyncError> {
        let mut state = self.inner.state.lock();
        if state.outcome.is_some() {
            return Err(SyncError::InvalidState("promise already settled"));
        }
        state.outcome = Some(settlement.clone());
        if state.callback.is_some() && !state.dispatched {
            state.dispatched = true;
            let callback = state.callback.take();
            drop(state);
            self.dispatch(callback, settlement);
        }
        Ok(())
    }

    /// Register the terminal callback.
    ///
    /// If the promise is already settled the callback is scheduled
    /// immediately (still deferred through the wake handle). Registering a
    /// second callback errors `InvalidState`.
    pub fn then(&self, callback: impl FnOnce(Settlement) + Send + 'static) -> Result<(), SyncError> {
        let mut state = self.inner.state.lock();
        if state.callback_registered {
            return Err(SyncError::InvalidState("promise callback already registered"));
        }
        state.callback_registered = true;
        match state.outcome.clone() {
            Some(settlement) => {
                state.dispatched = true;
                drop(state);
                self.dispatch(Some(Box::new(callback)), settlement);
            }
            None => {
                state.callback = Some(Box::new(callback));
            }
        }
        Ok(())
    }

    fn dispatch(&self, callback: Option<Callback>, settlement: Settlement) {
        if let Some(callback) = callback {
            tracing::trace!(fulfilled = settlement.is_fulfilled(), "deferring promise callback");
            self.inner.handle.spawn(async move {
                callback(settlement);
            });
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().outcome.is_none()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(
            self.inner.state.lock().outcome,
            Some(Settlement::Fulfilled(_))
        )
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self.inner.state.lock().outcome,
            Some(Settlement::Rejected { .. })
        )
    }

    /// Fulfilled payload, if any.
    pub fn payload(&self) -> Option<Bytes> {
        match &self.inner.state.lock().outcome {
            Some(Settlement::Fulfilled(payload)) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Rejection code, if rejected.
    pub fn error_code(&self) -> Option<Status> {
        match &self.inner.state.lock().outcome {
            Some(Settlement::Rejected { code, .. }) => Some(*code),
            _ => None,
        }
    }

    /// Rejection message, if rejected.
    pub fn error_message(&self) -> Option<String> {
        match &self.inner.state.lock().outcome {
            Some(Settlement::Rejected { message, .. }) => Some(message.clone()),
            _ => None,
        }
    }

    /// The handle callbacks are deferred through.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn resolve_then_callback_runs_once() {
        let handle = Handle::current();
        let promise = Promise::new(&handle);
        let (tx, mut rx) = mpsc::unbounded_channel();

        promise
            .then(move |settlement| {
                tx.send(settlement).unwrap();
            })
            .unwrap();
        promise.resolve(Bytes::from_static(b"v")).unwrap();

        let settlement = rx.recv().await.unwrap();
        assert_eq!(settlement, Settlement::Fulfilled(Bytes::from_static(b"v")));
        // No second delivery.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn then_after_settlement_schedules_immediately() {
        let handle = Handle::current();
        let promise = Promise::new(&handle);
        promise.resolve(Bytes::from_static(b"late")).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        promise
            .then(move |settlement| {
                tx.send(settlement).unwrap();
            })
            .unwrap();

        let settlement = rx.recv().await.unwrap();
        assert_eq!(
            settlement,
            Settlement::Fulfilled(Bytes::from_static(b"late"))
        );
    }

    #[tokio::test]
    async fn second_settlement_is_invalid_state() {
        let handle = Handle::current();
        let promise = Promise::new(&handle);
        promise.resolve(Bytes::new()).unwrap();
        assert_eq!(
            promise.resolve(Bytes::new()),
            Err(SyncError::InvalidState("promise already settled"))
        );
        assert_eq!(
            promise.reject(Status::Generic, "no"),
            Err(SyncError::InvalidState("promise already settled"))
        );
    }

    #[tokio::test]
    async fn second_then_is_invalid_state() {
        let handle = Handle::current();
        let promise = Promise::new(&handle);
        promise.then(|_| {}).unwrap();
        assert!(promise.then(|_| {}).is_err());
    }

    #[tokio::test]
    async fn callback_is_deferred_not_synchronous() {
        let handle = Handle::current();
        let promise = Promise::new(&handle);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx_cb = tx.clone();
        promise
            .then(move |_| {
                tx_cb.send("callback").unwrap();
            })
            .unwrap();

        promise.resolve(Bytes::new()).unwrap();
        // The resolver's own marker must win the race against the deferred
        // callback since no await point has been crossed yet.
        tx.send("resolver").unwrap();

        assert_eq!(rx.recv().await.unwrap(), "resolver");
        assert_eq!(rx.recv().await.unwrap(), "callback");
    }

    #[tokio::test]
    async fn rejection_accessors() {
        let handle = Handle::current();
        let promise = Promise::new(&handle);
        assert!(promise.is_pending());

        promise.reject(Status::Timeout, "too slow").unwrap();
        assert!(promise.is_rejected());
        assert!(!promise.is_fulfilled());
        assert_eq!(promise.error_code(), Some(Status::Timeout));
        assert_eq!(promise.error_message().as_deref(), Some("too slow"));
        assert_eq!(promise.payload(), None);
    }
}
