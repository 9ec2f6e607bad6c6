//! Single-consumer serializing mailbox.
//!
//! [`Mailbox`] linearises message handling: producers enqueue from any
//! thread without blocking, and a drain job on the executor processes
//! messages one at a time. The handler is therefore the sole mutator of
//! whatever state it closes over, with no further locking required for
//! correctness.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ACTIVATION-COUNT HANDOFF                    │
//! │                                                                 │
//! │  producer A ── push ── count 0→1 ──► schedules drain            │
//! │  producer B ── push ── count 1→2      │                         │
//! │                                       ▼                         │
//! │                              drain: handle, handle, …           │
//! │                              count →0: drain exits              │
//! │  producer C ── push ── count 0→1 ──► schedules next drain       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The producer that moves the counter off zero owns scheduling the drain;
//! the drain exits only after returning the counter to zero. At most one
//! drain job exists per mailbox at any time, which is the whole ordering
//! story: messages from one producer are handled in send order, and every
//! message observes the full effect of its predecessor.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::executor::Executor;

/// Messages handled per drain before the mailbox yields its worker and
/// re-schedules itself, so one busy mailbox cannot starve the pool.
const DRAIN_BATCH: usize = 128;

/// A serializing dispatcher: unbounded lock-free enqueue, single-consumer
/// handling on the executor.
pub struct Mailbox<M: Send + 'static> {
    inner: Arc<Inner<M>>,
}

struct Inner<M> {
    /// Buffered messages, FIFO.
    queue: SegQueue<M>,
    /// Messages pushed but not yet handled; doubles as the activation count.
    pending: AtomicUsize,
    /// Handles one message at a time; never invoked concurrently.
    handler: Box<dyn Fn(M) + Send + Sync>,
    executor: Arc<dyn Executor>,
}

impl<M: Send + 'static> Mailbox<M> {
    /// Creates a mailbox whose messages are handled by `handler` on the
    /// given executor.
    #[must_use]
    pub fn new(
        executor: Arc<dyn Executor>,
        handler: impl Fn(M) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: SegQueue::new(),
                pending: AtomicUsize::new(0),
                handler: Box::new(handler),
                executor,
            }),
        }
    }

    /// Enqueues a message.
    ///
    /// Non-blocking and lock-free for the producer. The producer whose push
    /// activates an idle mailbox schedules the drain.
    pub fn send(&self, message: M) {
        self.inner.queue.push(message);
        if self.inner.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            trace!("mailbox activated");
            schedule_drain(&self.inner);
        }
    }

    /// Returns the number of messages enqueued but not yet handled.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }
}

impl<M: Send + 'static> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Send + 'static> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("backlog", &self.backlog())
            .finish_non_exhaustive()
    }
}

fn schedule_drain<M: Send + 'static>(inner: &Arc<Inner<M>>) {
    let drain_inner = Arc::clone(inner);
    inner
        .executor
        .execute(Box::new(move || drain(&drain_inner)));
}

fn drain<M: Send + 'static>(inner: &Arc<Inner<M>>) {
    let mut handled = 0usize;
    loop {
        // A producer pushes before bumping the counter, and the counter read
        // that brought us here acquires that push; the retry below covers
        // only the instant between a competing producer's push and bump.
        let message = loop {
            match inner.queue.pop() {
                Some(message) => break message,
                None => std::hint::spin_loop(),
            }
        };

        (inner.handler)(message);
        handled += 1;

        if inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            break;
        }
        if handled >= DRAIN_BATCH {
            trace!(handled, "mailbox batch limit, re-scheduling");
            schedule_drain(inner);
            break;
        }
    }
}
