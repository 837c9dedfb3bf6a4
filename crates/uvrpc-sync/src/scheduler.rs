use std::time::Duration;

use tokio::runtime::Handle;

use crate::{Promise, Semaphore, SyncError, WaitGroup};

/// Runs a batch of promise-settling tasks under a concurrency cap.
///
/// A [`Semaphore`] bounds how many tasks run at once and a [`WaitGroup`]
/// tracks batch completion. Each submitted task receives a fresh promise;
/// settling it (fulfill or reject) releases the task's permit and counts the
/// task as done.
#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    semaphore: Semaphore,
    waitgroup: WaitGroup,
}

impl Scheduler {
    /// Create a scheduler allowing `concurrency` tasks in flight.
    pub fn new(handle: &Handle, concurrency: usize) -> Self {
        Self {
            handle: handle.clone(),
            semaphore: Semaphore::new(concurrency),
            waitgroup: WaitGroup::new(handle),
        }
    }

    /// Queue one task.
    ///
    /// `task` runs once a permit is available, receiving the promise it must
    /// eventually settle. The returned promise is the same one; its terminal
    /// callback slot is owned by the scheduler, but the accessors remain
    /// available for inspection.
    pub fn submit<F>(&self, task: F) -> Result<Promise, SyncError>
    where
        F: FnOnce(Promise) + Send + 'static,
    {
        self.waitgroup.add(1)?;

        let task_promise = Promise::new(&self.handle);
        {
            let semaphore = self.semaphore.clone();
            let waitgroup = self.waitgroup.clone();
            task_promise.then(move |_| {
                semaphore.release();
                let _ = waitgroup.done();
            })?;
        }

        // The gate promise resolves when a permit is handed to this task.
        let gate = Promise::new(&self.handle);
        {
            let task_promise = task_promise.clone();
            gate.then(move |_| task(task_promise))?;
        }
        self.semaphore.acquire_async(&gate)?;

        Ok(task_promise)
    }

    /// Wait until every submitted task has settled, or `timeout` elapses.
    ///
    /// Consumes the wait-group completion callback, so it may be called at
    /// most once per scheduler. Returns immediately if nothing was ever
    /// submitted.
    pub async fn wait_all(&self, timeout: Duration) -> Result<(), SyncError> {
        if !self.waitgroup.armed() {
            return Ok(());
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.waitgroup.promise().then(move |_| {
            let _ = tx.send(());
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::InvalidState("completion promise dropped")),
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Tasks currently waiting for a permit.
    pub fn queued(&self) -> usize {
        self.semaphore.waiting()
    }

    /// Tasks submitted but not yet settled.
    pub fn in_flight(&self) -> u64 {
        self.waitgroup.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn batch_respects_concurrency_cap() {
        let handle = Handle::current();
        let scheduler = Scheduler::new(&handle, 2);

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            scheduler
                .submit(move |promise| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let running = running.clone();
                    // Settle from a spawned task so concurrency is observable.
                    promise.handle().clone().spawn(async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        let _ = promise.resolve(Bytes::new());
                    });
                })
                .unwrap();
        }

        scheduler.wait_all(Duration::from_secs(5)).await.unwrap();
        assert_eq!(scheduler.in_flight(), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn wait_all_on_idle_scheduler_returns() {
        let handle = Handle::current();
        let scheduler = Scheduler::new(&handle, 4);
        scheduler.wait_all(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_all_times_out_on_stuck_task() {
        let handle = Handle::current();
        let scheduler = Scheduler::new(&handle, 1);
        scheduler.submit(|_promise| { /* never settles */ }).unwrap();
        assert_eq!(
            scheduler.wait_all(Duration::from_millis(50)).await,
            Err(SyncError::Timeout)
        );
    }

    #[tokio::test]
    async fn rejected_tasks_still_release_permits() {
        let handle = Handle::current();
        let scheduler = Scheduler::new(&handle, 1);
        let ran = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let ran = ran.clone();
            scheduler
                .submit(move |promise| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    let _ = if i % 2 == 0 {
                        promise.resolve(Bytes::new())
                    } else {
                        promise.reject(uvrpc_wire::Status::Generic, "task failed")
                    };
                })
                .unwrap();
        }

        scheduler.wait_all(Duration::from_secs(5)).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }
}
