use log::warn;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use crate::error::SnapshotStoreError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Dedicated single-threaded executor for one partition's snapshot store.
///
/// Jobs run in submission order on one named OS thread, which serializes
/// every store-mutating step. A panicking job is caught and logged so the
/// executor keeps draining.
pub(crate) struct PartitionExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PartitionExecutor {
    pub(crate) fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.clone();
        let join = thread::Builder::new().name(name).spawn(move || {
            while let Ok(job) = receiver.recv() {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("event=executor_job_panic thread={thread_name}");
                }
            }
        })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            join: Mutex::new(Some(join)),
        })
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), SnapshotStoreError> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| SnapshotStoreError::Closed),
            None => Err(SnapshotStoreError::Closed),
        }
    }

    /// Stops accepting jobs, drains what was already queued and joins the
    /// executor thread. Safe to call more than once. When invoked from the
    /// executor thread itself the join is skipped and the thread winds down
    /// on its own once the queue drains.
    pub(crate) fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for PartitionExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completion of an asynchronous store operation.
///
/// Callers may `join` from any thread (repeatedly; the result is cloned) or
/// attach a `then` callback that runs on the completing thread. Failure is
/// carried as a [`SnapshotStoreError`].
pub struct Completion<T> {
    state: Arc<CompletionState<T>>,
}

struct CompletionState<T> {
    slot: Mutex<Slot<T>>,
    signal: Condvar,
}

type Callback<T> = Box<dyn FnOnce(&Result<T, SnapshotStoreError>) + Send>;

enum Slot<T> {
    Pending(Vec<Callback<T>>),
    Done(Result<T, SnapshotStoreError>),
}

impl<T: Clone> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(CompletionState {
                slot: Mutex::new(Slot::Pending(Vec::new())),
                signal: Condvar::new(),
            }),
        }
    }

    pub(crate) fn done(result: Result<T, SnapshotStoreError>) -> Self {
        Self {
            state: Arc::new(CompletionState {
                slot: Mutex::new(Slot::Done(result)),
                signal: Condvar::new(),
            }),
        }
    }

    pub(crate) fn failed(err: SnapshotStoreError) -> Self {
        Self::done(Err(err))
    }

    /// Blocks until the operation settles and returns its result.
    pub fn join(&self) -> Result<T, SnapshotStoreError> {
        let mut slot = self.state.slot.lock();
        loop {
            if let Slot::Done(result) = &*slot {
                return result.clone();
            }
            self.state.signal.wait(&mut slot);
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.state.slot.lock(), Slot::Done(_))
    }

    /// Runs `callback` once the operation settles. If it already has, the
    /// callback runs on the calling thread; otherwise it runs on the
    /// completing thread, after joiners are released.
    pub fn then<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T, SnapshotStoreError>) + Send + 'static,
    {
        let run_now = {
            let mut slot = self.state.slot.lock();
            match &mut *slot {
                Slot::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    None
                }
                Slot::Done(result) => {
                    Some((Box::new(callback) as Callback<T>, result.clone()))
                }
            }
        };
        if let Some((callback, result)) = run_now {
            callback(&result);
        }
    }

    pub(crate) fn complete(&self, result: Result<T, SnapshotStoreError>) {
        let callbacks = {
            let mut slot = self.state.slot.lock();
            match &mut *slot {
                Slot::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *slot = Slot::Done(result.clone());
                    self.state.signal.notify_all();
                    callbacks
                }
                // Completing twice is a programming error inside the store;
                // the first result wins.
                Slot::Done(_) => Vec::new(),
            }
        };
        for callback in callbacks {
            callback(&result);
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_in_submission_order() {
        let executor = PartitionExecutor::spawn("executor-test").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for value in 0..8 {
            let seen = Arc::clone(&seen);
            executor
                .submit(Box::new(move || seen.lock().push(value)))
                .unwrap();
        }
        executor.shutdown();
        assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn submit_after_shutdown_is_refused() {
        let executor = PartitionExecutor::spawn("executor-closed").unwrap();
        executor.shutdown();
        let result = executor.submit(Box::new(|| {}));
        assert!(matches!(result, Err(SnapshotStoreError::Closed)));
    }

    #[test]
    fn panicking_job_does_not_kill_the_executor() {
        let executor = PartitionExecutor::spawn("executor-panic").unwrap();
        executor.submit(Box::new(|| panic!("boom"))).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&ran);
        executor
            .submit(Box::new(move || {
                observer.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        executor.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_joins_from_another_thread() {
        let completion: Completion<u64> = Completion::new();
        let remote = completion.clone();
        let joiner = thread::spawn(move || remote.join());
        completion.complete(Ok(7));
        assert_eq!(joiner.join().unwrap().unwrap(), 7);
        // join is repeatable
        assert_eq!(completion.join().unwrap(), 7);
    }

    #[test]
    fn then_runs_after_completion_and_immediately_when_settled() {
        let completion: Completion<u64> = Completion::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        completion.then(move |result| sink.lock().push(result.clone().unwrap()));
        completion.complete(Ok(1));
        let sink = Arc::clone(&observed);
        completion.then(move |result| sink.lock().push(result.clone().unwrap()));
        assert_eq!(*observed.lock(), vec![1, 1]);
    }

    #[test]
    fn first_completion_wins() {
        let completion: Completion<u64> = Completion::new();
        assert!(!completion.is_done());
        completion.complete(Ok(1));
        completion.complete(Ok(2));
        assert!(completion.is_done());
        assert_eq!(completion.join().unwrap(), 1);
    }
}
