//! The asynchronous single-assignment-with-updates reference cell.
//!
//! A [`Cell`] starts empty, is assigned at most one *first* value, and may
//! be reassigned any number of times afterwards. Reads that arrive while
//! the cell is empty park until the first value; reads after that complete
//! immediately with the latest value. Every successful assignment bumps a
//! monotonic version, which makes optimistic compare-and-set (and therefore
//! lock-free read-modify-write via [`Cell::modify`]) expressible without
//! exposing internal state.
//!
//! All state transitions flow through a single-consumer [`Mailbox`]
//! carrying exactly four message shapes: read, unconditional set,
//! version-conditional set, and read cancellation. The mailbox handler is
//! the only mutator of cell state; user callbacks are re-scheduled onto the
//! executor so arbitrary user code never runs inside the handler.
//!
//! # Cancel Safety
//!
//! - A pending read can be cancelled via [`Cell::get_cancellable`]; the
//!   cancelled read's callback never fires and no registration is left
//!   behind.
//! - Cancelling a read does not cancel any submitted computation; a
//!   computation whose result is no longer wanted simply completes into the
//!   cell (or is discarded, for race losers).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::completion::{pair, Receipt};
use crate::error::Result;
use crate::executor::{run_user, Executor};
use crate::mailbox::Mailbox;
use crate::waiters::{WaiterId, WaiterMap};

type ReadCallback<A> = Box<dyn FnOnce(Result<(A, u64)>) + Send>;
type VerdictCallback = Box<dyn FnOnce(bool) + Send>;
type AckCallback = Box<dyn FnOnce() + Send>;

/// The four message shapes mediated by the cell's mailbox.
pub(crate) enum Msg<A> {
    /// Request the current value; park under `id` if the cell is empty.
    Read { id: WaiterId, cb: ReadCallback<A> },
    /// Unconditional assignment; always bumps the version.
    Set { value: Result<A>, ack: AckCallback },
    /// Conditional assignment: succeeds iff the version still matches.
    TrySet {
        expected: u64,
        value: Result<A>,
        cb: VerdictCallback,
    },
    /// Cancel a parked read; reports whether it was still registered.
    Nevermind { id: WaiterId, cb: VerdictCallback },
}

/// Cell state, owned by the mailbox handler.
struct CellBody<A> {
    /// Empty until the first assignment, then always the latest result.
    value: Option<Result<A>>,
    /// Strictly increases on every successful Set or TrySet.
    version: u64,
    /// Reads parked while the cell is empty, in arrival order.
    waiters: WaiterMap<ReadCallback<A>>,
}

impl<A: Clone + Send + 'static> CellBody<A> {
    /// Performs an assignment: bump the version, wake parked readers if
    /// this is the first value, store the result.
    fn assign(&mut self, value: Result<A>, executor: &Arc<dyn Executor>) {
        self.version += 1;
        let version = self.version;

        if self.value.is_none() && !self.waiters.is_empty() {
            let woken = self.waiters.drain();
            trace!(version, woken = woken.len(), "first value wakes readers");
            for (_, cb) in woken {
                let stamped = stamp(value.clone(), version);
                executor.execute(Box::new(move || cb(stamped)));
            }
        }

        self.value = Some(value);
    }
}

fn stamp<A>(value: Result<A>, version: u64) -> Result<(A, u64)> {
    value.map(|a| (a, version))
}

fn handle<A: Clone + Send + 'static>(
    body: &mut CellBody<A>,
    msg: Msg<A>,
    executor: &Arc<dyn Executor>,
) {
    match msg {
        Msg::Read { id, cb } => match &body.value {
            None => body.waiters.insert(id, cb),
            Some(value) => {
                let stamped = stamp(value.clone(), body.version);
                executor.execute(Box::new(move || cb(stamped)));
            }
        },
        Msg::Set { value, ack } => {
            body.assign(value, executor);
            // Inline on purpose: once the ack is observed, any read sent
            // afterwards linearizes behind this assignment.
            ack();
        }
        Msg::TrySet {
            expected,
            value,
            cb,
        } => {
            let hit = expected == body.version;
            if hit {
                body.assign(value, executor);
            } else {
                trace!(expected, version = body.version, "conditional set missed");
            }
            executor.execute(Box::new(move || cb(hit)));
        }
        Msg::Nevermind { id, cb } => {
            let found = body.waiters.remove(id).is_some();
            executor.execute(Box::new(move || cb(found)));
        }
    }
}

/// An asynchronous, versioned reference cell.
///
/// `Cell` is a cheap handle: clones share one mailbox and one state. A cell
/// is freed once every handle (including those captured by still-running
/// computations) is dropped.
///
/// # Example
///
/// ```
/// use asyncell::{Cell, ThreadPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(ThreadPool::new(2));
/// let cell: Cell<u32> = Cell::new(pool);
/// cell.set_async_value(42);
/// assert_eq!(cell.get().wait().unwrap(), 42);
/// ```
pub struct Cell<A: Clone + Send + 'static> {
    mailbox: Mailbox<Msg<A>>,
    executor: Arc<dyn Executor>,
}

impl<A: Clone + Send + 'static> Cell<A> {
    /// Creates an empty cell dispatching on the given executor.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let body = Mutex::new(CellBody {
            value: None,
            version: 0,
            waiters: WaiterMap::new(),
        });
        let handler_executor = Arc::clone(&executor);
        let mailbox = Mailbox::new(Arc::clone(&executor), move |msg| {
            // The mailbox already serializes handler invocations; the lock
            // only makes that exclusivity visible to the compiler.
            let mut body = body.lock().expect("cell state poisoned");
            handle(&mut body, msg, &handler_executor);
        });
        Self { mailbox, executor }
    }

    /// Creates a cell pre-set to `value` via an asynchronous set.
    #[must_use]
    pub fn with_value(executor: Arc<dyn Executor>, value: A) -> Self {
        let cell = Self::new(executor);
        cell.set_async_value(value);
        cell
    }

    /// Reads the current value, or awaits the first assignment.
    ///
    /// Every reader parked at the moment of the first assignment is
    /// delivered that value exactly once, in arrival order. Readers of a
    /// failed cell receive the failure.
    #[must_use]
    pub fn get(&self) -> Receipt<Result<A>> {
        let (tx, rx) = pair();
        let id = WaiterId::next();
        self.mailbox.send(Msg::Read {
            id,
            cb: Box::new(move |stamped| tx.complete(stamped.map(|(a, _)| a))),
        });
        rx
    }

    /// As [`Cell::get`], plus a handle that can cancel the pending read.
    ///
    /// Cancellation is idempotent and harmless after delivery: the first
    /// cancel of a still-parked read reports `true` and the read never
    /// completes; any other cancel reports `false`.
    #[must_use]
    pub fn get_cancellable(&self) -> (Receipt<Result<A>>, CancelHandle<A>) {
        let (tx, rx) = pair();
        let id = WaiterId::next();
        self.mailbox.send(Msg::Read {
            id,
            cb: Box::new(move |stamped| tx.complete(stamped.map(|(a, _)| a))),
        });
        (
            rx,
            CancelHandle {
                id,
                mailbox: self.mailbox.clone(),
            },
        )
    }

    /// Reads the current value together with a one-shot conditional setter.
    ///
    /// The setter commits iff no assignment has intervened since this read
    /// was handled. It is consumed by use; a successful commit makes its
    /// stamp stale by definition, so it cannot be offered twice.
    #[must_use]
    pub fn access(&self) -> Receipt<Result<(A, CellSetter<A>)>> {
        let (tx, rx) = pair();
        let id = WaiterId::next();
        let mailbox = self.mailbox.clone();
        self.mailbox.send(Msg::Read {
            id,
            cb: Box::new(move |stamped| {
                tx.complete(stamped.map(|(a, version)| {
                    (
                        a,
                        CellSetter {
                            expected: version,
                            mailbox,
                        },
                    )
                }));
            }),
        });
        rx
    }

    /// Attempts a single read-modify-write.
    ///
    /// Returns `Ok(None)` if another assignment intervened between the read
    /// and the conditional set. `f` may be invoked again by [`Cell::modify`]
    /// and must be safe to re-run.
    ///
    /// # Errors
    ///
    /// Propagates the stored failure if the cell holds one.
    pub async fn try_modify<F>(&self, f: F) -> Result<Option<Change<A>>>
    where
        F: Fn(&A) -> A,
    {
        let (previous, setter) = self.access().await?;
        let now = f(&previous);
        if setter.set(Ok(now.clone())).await {
            Ok(Some(Change { previous, now }))
        } else {
            Ok(None)
        }
    }

    /// Read-modify-write, retried until the conditional set lands.
    ///
    /// Each retry starts from a fresh read; `f` never sees a stale value.
    /// If `f` panics the cell is untouched.
    ///
    /// # Errors
    ///
    /// Propagates the stored failure if the cell holds one.
    pub async fn modify<F>(&self, f: F) -> Result<Change<A>>
    where
        F: Fn(&A) -> A,
    {
        loop {
            if let Some(change) = self.try_modify(&f).await? {
                return Ok(change);
            }
        }
    }

    /// As [`Cell::try_modify`], with `f` returning an auxiliary value that
    /// is handed back alongside the change.
    ///
    /// # Errors
    ///
    /// Propagates the stored failure if the cell holds one.
    pub async fn try_modify2<B, F>(&self, f: F) -> Result<Option<(Change<A>, B)>>
    where
        F: Fn(&A) -> (A, B),
    {
        let (previous, setter) = self.access().await?;
        let (now, aux) = f(&previous);
        if setter.set(Ok(now.clone())).await {
            Ok(Some((Change { previous, now }, aux)))
        } else {
            Ok(None)
        }
    }

    /// As [`Cell::modify`], with an auxiliary result.
    ///
    /// # Errors
    ///
    /// Propagates the stored failure if the cell holds one.
    pub async fn modify2<B, F>(&self, f: F) -> Result<(Change<A>, B)>
    where
        F: Fn(&A) -> (A, B),
    {
        loop {
            if let Some(outcome) = self.try_modify2(&f).await? {
                return Ok(outcome);
            }
        }
    }

    /// Submits a computation; its result is assigned on completion.
    ///
    /// Returns as soon as the computation is submitted. A panic in `f` is
    /// assigned as a failure, not swallowed.
    pub fn set_async<F>(&self, f: F)
    where
        F: FnOnce() -> Result<A> + Send + 'static,
    {
        let mailbox = self.mailbox.clone();
        self.executor.execute(Box::new(move || {
            let value = run_user(f);
            mailbox.send(Msg::Set {
                value,
                ack: Box::new(|| {}),
            });
        }));
    }

    /// Assigns a plain value asynchronously.
    ///
    /// The assignment is enqueued immediately, so a read sent afterwards
    /// from the same thread observes it (or something newer).
    pub fn set_async_value(&self, value: A) {
        self.send_set(Ok(value));
    }

    /// Submits a computation and returns a receipt that completes once the
    /// resulting assignment has taken effect.
    ///
    /// After the receipt fires, every subsequently issued read observes a
    /// version at least as new as this assignment's.
    #[must_use]
    pub fn set_sync<F>(&self, f: F) -> Receipt<()>
    where
        F: FnOnce() -> Result<A> + Send + 'static,
    {
        let (tx, rx) = pair();
        let mailbox = self.mailbox.clone();
        self.executor.execute(Box::new(move || {
            let value = run_user(f);
            mailbox.send(Msg::Set {
                value,
                ack: Box::new(move || tx.complete(())),
            });
        }));
        rx
    }

    /// Assigns a plain value; the receipt completes once the assignment has
    /// taken effect.
    #[must_use]
    pub fn set_sync_value(&self, value: A) -> Receipt<()> {
        let (tx, rx) = pair();
        self.mailbox.send(Msg::Set {
            value: Ok(value),
            ack: Box::new(move || tx.complete(())),
        });
        rx
    }

    /// Runs two computations; the first to complete assigns the cell.
    ///
    /// The loser keeps running, but its result is discarded and its handle
    /// to the cell is severed at the moment the winner commits, so the cell
    /// can be reclaimed while the loser is still in flight. A panic in a
    /// branch is an ordinary completion (a failure) and can win.
    pub fn race<F1, F2>(&self, f1: F1, f2: F2)
    where
        F1: FnOnce() -> Result<A> + Send + 'static,
        F2: FnOnce() -> Result<A> + Send + 'static,
    {
        let won = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(Mutex::new(Some(self.mailbox.clone())));
        spawn_race_branch(&self.executor, &won, &slot, f1);
        spawn_race_branch(&self.executor, &won, &slot, f2);
    }

    pub(crate) fn send_set(&self, value: Result<A>) {
        self.mailbox.send(Msg::Set {
            value,
            ack: Box::new(|| {}),
        });
    }
}

fn spawn_race_branch<A, F>(
    executor: &Arc<dyn Executor>,
    won: &Arc<AtomicBool>,
    slot: &Arc<Mutex<Option<Mailbox<Msg<A>>>>>,
    f: F,
) where
    A: Clone + Send + 'static,
    F: FnOnce() -> Result<A> + Send + 'static,
{
    let won = Arc::clone(won);
    let slot = Arc::clone(slot);
    executor.execute(Box::new(move || {
        let value = run_user(f);
        if won
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Take the mailbox out of the shared slot before sending: the
            // losing branch keeps running with a severed slot and no longer
            // pins the cell.
            let mailbox = slot.lock().expect("race slot poisoned").take();
            if let Some(mailbox) = mailbox {
                trace!("race winner assigns");
                mailbox.send(Msg::Set {
                    value,
                    ack: Box::new(|| {}),
                });
            }
        } else {
            trace!("race loser result discarded");
        }
    }));
}

impl<A: Clone + Send + 'static> Clone for Cell<A> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<A: Clone + Send + 'static> fmt::Debug for Cell<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

/// Cancels the pending read it was issued with.
pub struct CancelHandle<A: Clone + Send + 'static> {
    id: WaiterId,
    mailbox: Mailbox<Msg<A>>,
}

impl<A: Clone + Send + 'static> CancelHandle<A> {
    /// Cancels the read; the receipt reports whether it was still parked.
    ///
    /// After a `true` verdict the read's callback will never fire. Safe to
    /// call again, and after delivery: those cancels report `false`.
    #[must_use]
    pub fn cancel(&self) -> Receipt<bool> {
        let (tx, rx) = pair();
        self.mailbox.send(Msg::Nevermind {
            id: self.id,
            cb: Box::new(move |found| tx.complete(found)),
        });
        rx
    }
}

impl<A: Clone + Send + 'static> fmt::Debug for CancelHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// One-shot conditional setter obtained from [`Cell::access`].
///
/// Carries the version observed by the read; committing succeeds iff that
/// version is still current. Consumed by use.
pub struct CellSetter<A: Clone + Send + 'static> {
    expected: u64,
    mailbox: Mailbox<Msg<A>>,
}

impl<A: Clone + Send + 'static> CellSetter<A> {
    /// Offers a result; the receipt reports whether it was accepted.
    #[must_use]
    pub fn set(self, value: Result<A>) -> Receipt<bool> {
        let (tx, rx) = pair();
        self.mailbox.send(Msg::TrySet {
            expected: self.expected,
            value,
            cb: Box::new(move |hit| tx.complete(hit)),
        });
        rx
    }
}

impl<A: Clone + Send + 'static> fmt::Debug for CellSetter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSetter")
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

/// Before/after pair returned by a successful modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<A> {
    /// The value read before the modification.
    pub previous: A,
    /// The value the modification assigned.
    pub now: A,
}

impl<A> Change<A> {
    /// Returns true if the modification changed the value.
    #[must_use]
    pub fn modified(&self) -> bool
    where
        A: PartialEq,
    {
        self.previous != self.now
    }

    /// As [`Change::modified`], under a caller-supplied equivalence.
    #[must_use]
    pub fn modified_by<F>(&self, eq: F) -> bool
    where
        F: Fn(&A, &A) -> bool,
    {
        !eq(&self.previous, &self.now)
    }
}
