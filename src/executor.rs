//! Worker pool for callback dispatch and user computations.
//!
//! The cell never runs user code inside its serialized handler: every value
//! delivery, every verdict callback, and every submitted computation is
//! re-scheduled onto an [`Executor`]. The executor is caller-supplied;
//! [`ThreadPool`] is the default implementation, a fixed set of worker
//! threads draining a lock-free queue.
//!
//! # Panic Isolation
//!
//! A job that panics is caught inside the worker loop, so a poisonous
//! callback cannot retire a worker. Submitted computations are additionally
//! caught closer to the cell, where the panic becomes an error value.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// A boxed unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch target for callbacks and user computations.
///
/// Implementations must accept jobs from any thread without blocking the
/// caller. Jobs submitted from a single thread must run in submission order
/// when executed by a single worker; across workers no ordering is implied.
pub trait Executor: Send + Sync + 'static {
    /// Enqueues a job for execution.
    fn execute(&self, job: Job);
}

/// A fixed-size worker pool.
///
/// Workers are spawned eagerly and park on a condition variable when the
/// queue is empty. Shutdown drains the queue: jobs already submitted still
/// run; jobs submitted after shutdown are dropped.
///
/// Dropping the pool initiates shutdown without waiting, so the last handle
/// may safely be dropped from a worker thread. Call
/// [`ThreadPool::shutdown_and_wait`] for a bounded teardown.
///
/// # Example
///
/// ```
/// use asyncell::{Executor, ThreadPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(ThreadPool::new(2));
/// pool.execute(Box::new(|| println!("on a worker")));
/// ```
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Work queue.
    queue: SegQueue<Job>,
    /// Number of jobs pushed but not yet started.
    pending: AtomicUsize,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Number of workers still running their loop.
    active: AtomicUsize,
    /// Mutex for the condition variable.
    mutex: Mutex<()>,
    /// Parks idle workers.
    condvar: Condvar,
    /// Worker join handles, collected on shutdown.
    workers: Mutex<Vec<ThreadJoinHandle<()>>>,
}

impl ThreadPool {
    /// Creates a pool with the given number of workers.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is 0.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_name_prefix("asyncell", workers)
    }

    /// Creates a pool whose worker threads carry the given name prefix.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is 0.
    #[must_use]
    pub fn with_name_prefix(prefix: &str, workers: usize) -> Self {
        assert!(workers > 0, "thread pool needs at least one worker");

        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(workers)),
        });

        for index in 0..workers {
            let worker_inner = Arc::clone(&inner);
            worker_inner.active.fetch_add(1, Ordering::Relaxed);
            let handle = thread::Builder::new()
                .name(format!("{prefix}-worker-{index}"))
                .spawn(move || {
                    worker_loop(&worker_inner);
                    worker_inner.active.fetch_sub(1, Ordering::Release);
                })
                .expect("failed to spawn pool worker");
            inner
                .workers
                .lock()
                .expect("pool worker list poisoned")
                .push(handle);
        }

        debug!(workers, "thread pool started");
        Self { inner }
    }

    /// Returns the number of jobs queued but not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Returns the number of workers still running.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Returns true if the pool has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown.
    ///
    /// Queued jobs still run; newly submitted jobs are dropped. Workers exit
    /// once the queue is drained.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock().expect("pool mutex poisoned");
        self.inner.condvar.notify_all();
    }

    /// Shuts down and waits for workers to exit.
    ///
    /// Returns `true` if every worker exited within the timeout.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();

        let deadline = std::time::Instant::now() + timeout;
        while self.inner.active.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.inner.mutex.lock().expect("pool mutex poisoned");
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let mut handles = self.inner.workers.lock().expect("pool worker list poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            trace!("job dropped: pool is shut down");
            return;
        }
        self.inner.queue.push(job);
        self.inner.pending.fetch_add(1, Ordering::Release);
        let _guard = self.inner.mutex.lock().expect("pool mutex poisoned");
        self.inner.condvar.notify_one();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.worker_count())
            .field("pending", &self.pending_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // No join here: the last handle may drop on a worker thread, and a
        // worker cannot wait for itself. Workers exit once the queue drains.
        self.shutdown();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                debug!("job panicked; worker continues");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        // Re-check under the lock: a producer pushes before taking the lock
        // to notify, so an empty check here cannot miss a wakeup.
        let guard = inner.mutex.lock().expect("pool mutex poisoned");
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            drop(
                inner
                    .condvar
                    .wait(guard)
                    .expect("pool condvar wait poisoned"),
            );
        }
    }
}

/// Runs a user computation, converting a panic into an error value.
pub(crate) fn run_user<A>(f: impl FnOnce() -> crate::Result<A>) -> crate::Result<A> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(crate::Error::from_panic(payload.as_ref())),
    }
}

/// Drives a future to completion on the current thread.
///
/// Parks the thread between polls. This is a single-future driver for tests
/// and synchronous entry points, not a general-purpose runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    struct ThreadWaker(thread::Thread);

    impl Wake for ThreadWaker {
        fn wake(self: Arc<Self>) {
            self.0.unpark();
        }
    }

    let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);
    let mut future = std::pin::pin!(future);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => thread::park(),
        }
    }
}
