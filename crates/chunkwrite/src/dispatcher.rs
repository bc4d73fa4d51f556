// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{Level, event};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct DispatcherInner {
    sender: flume::Sender<Job>,
    pending_count: AtomicUsize,
    name: String,
}

/// A dedicated worker thread that executes blocking file operations on behalf of a sink.
///
/// There is exactly one worker, so jobs run one at a time in submission order. Completion
/// callbacks invoked from jobs are therefore delivered serially, which is what lets the
/// write loop own its cursor without a lock.
///
/// The worker exits once every clone of the dispatcher has been dropped and the queue
/// has drained.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Creates a dispatcher and starts its worker thread under the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to create the thread.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = flume::unbounded::<Job>();

        let inner = Arc::new(DispatcherInner {
            sender,
            pending_count: AtomicUsize::new(0),
            name: name.clone(),
        });

        // The worker only holds a weak view of the counters, so it does not keep the sender
        // (and thus itself) alive.
        let counters = Arc::downgrade(&inner);
        let _ = std::thread::Builder::new().name(name).spawn(move || {
            for job in receiver {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    event!(Level::ERROR, message = "dispatched job panicked");
                }

                if let Some(inner) = counters.upgrade() {
                    let _ = inner.pending_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        })?;

        Ok(Self { inner })
    }

    /// Queues `f` for execution on the worker thread and returns immediately.
    ///
    /// Jobs run in the order they were dispatched. A panicking job is logged and does not
    /// take the worker down.
    pub fn dispatch(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.inner.pending_count.fetch_add(1, Ordering::Relaxed);

        // The worker holds the receiver until every sender is gone and we hold a sender,
        // so the send cannot fail.
        if self.inner.sender.send(Box::new(f)).is_err() {
            let _ = self.inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            event!(Level::ERROR, message = "dispatcher worker is gone", worker = %self.inner.name);
        }
    }

    /// Number of jobs dispatched but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn runs_jobs_in_dispatch_order() {
        let dispatcher = Dispatcher::new("test-dispatcher").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = flume::bounded(1);

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            dispatcher.dispatch(move || seen.lock().unwrap().push(i));
        }
        dispatcher.dispatch(move || done_tx.send(()).unwrap());

        done_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn runs_jobs_on_named_worker_thread() {
        let dispatcher = Dispatcher::new("named-worker").unwrap();
        let (tx, rx) = flume::bounded(1);

        dispatcher.dispatch(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        });

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().as_deref(), Some("named-worker"));
        assert_ne!(thread::current().name(), Some("named-worker"));
    }

    #[test]
    fn survives_panicking_job() {
        let dispatcher = Dispatcher::new("panicky").unwrap();
        let (tx, rx) = flume::bounded(1);

        dispatcher.dispatch(|| panic!("boom"));
        dispatcher.dispatch(move || tx.send(42).unwrap());

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 42);
    }

    #[test]
    fn pending_count_drains() {
        let dispatcher = Dispatcher::new("pending").unwrap();
        let (release_tx, release_rx) = flume::bounded::<()>(0);
        let (done_tx, done_rx) = flume::bounded(1);

        dispatcher.dispatch(move || release_rx.recv().unwrap());
        dispatcher.dispatch(move || done_tx.send(()).unwrap());
        assert_eq!(dispatcher.pending(), 2);

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(TIMEOUT).unwrap();

        // The counter is decremented right after the job returns.
        let deadline = std::time::Instant::now() + TIMEOUT;
        while dispatcher.pending() != 0 {
            assert!(std::time::Instant::now() < deadline);
            thread::yield_now();
        }
    }
}
