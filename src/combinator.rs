//! Free combinators built over [`Cell`]: racing, background start, and
//! parallel collection.
//!
//! These are thin compositions: each allocates a private cell, wires
//! computations into it, and hands back read receipts. The cell supplies
//! the ordering and broadcast guarantees; nothing here adds state of its
//! own beyond the completion guard of the parallel helpers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::cell::Cell;
use crate::completion::Receipt;
use crate::error::Result;
use crate::executor::{run_user, Executor};

/// The result of a race, indicating which branch won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceResult<A, B> {
    /// The first branch won.
    First(A),
    /// The second branch won.
    Second(B),
}

impl<A, B> RaceResult<A, B> {
    /// Returns true if the first branch won.
    #[must_use]
    pub const fn is_first(&self) -> bool {
        matches!(self, Self::First(_))
    }

    /// Returns true if the second branch won.
    #[must_use]
    pub const fn is_second(&self) -> bool {
        matches!(self, Self::Second(_))
    }

    /// Maps the first variant.
    pub fn map_first<C, F: FnOnce(A) -> C>(self, f: F) -> RaceResult<C, B> {
        match self {
            Self::First(a) => RaceResult::First(f(a)),
            Self::Second(b) => RaceResult::Second(b),
        }
    }

    /// Maps the second variant.
    pub fn map_second<C, F: FnOnce(B) -> C>(self, f: F) -> RaceResult<A, C> {
        match self {
            Self::First(a) => RaceResult::First(a),
            Self::Second(b) => RaceResult::Second(f(b)),
        }
    }
}

/// Races two computations of different types; the first completion wins.
///
/// A private cell mediates the race, so the winner-selection guarantees of
/// [`Cell::race`] apply: exactly one assignment, loser discarded, a failing
/// branch wins only by completing first.
#[must_use]
pub fn race<A, B, F1, F2>(
    executor: Arc<dyn Executor>,
    f1: F1,
    f2: F2,
) -> Receipt<Result<RaceResult<A, B>>>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    F1: FnOnce() -> Result<A> + Send + 'static,
    F2: FnOnce() -> Result<B> + Send + 'static,
{
    let cell: Cell<RaceResult<A, B>> = Cell::new(executor);
    cell.race(
        move || f1().map(RaceResult::First),
        move || f2().map(RaceResult::Second),
    );
    cell.get()
}

/// Handle to a computation started in the background.
///
/// The computation runs once; its result is memoised in a private cell and
/// broadcast to every reader. Readers that arrive after completion receive
/// the value immediately. Cloning the handle shares the same result.
pub struct StartHandle<A: Clone + Send + 'static> {
    cell: Cell<A>,
}

impl<A: Clone + Send + 'static> StartHandle<A> {
    /// Reads the memoised result, awaiting completion if necessary.
    #[must_use]
    pub fn get(&self) -> Receipt<Result<A>> {
        self.cell.get()
    }
}

impl<A: Clone + Send + 'static> Clone for StartHandle<A> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<A: Clone + Send + 'static> fmt::Debug for StartHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartHandle").finish_non_exhaustive()
    }
}

/// Launches a computation in the background, returning a broadcast handle.
///
/// There is no cancellation: the computation runs to completion even if
/// every handle is dropped, at which point its result is unobservable and
/// the cell is freed.
#[must_use]
pub fn start<A, F>(executor: Arc<dyn Executor>, f: F) -> StartHandle<A>
where
    A: Clone + Send + 'static,
    F: FnOnce() -> Result<A> + Send + 'static,
{
    let cell = Cell::new(executor);
    cell.set_async(f);
    StartHandle { cell }
}

/// Launches a computation in the background.
#[deprecated(since = "0.1.0", note = "use `start`")]
#[must_use]
pub fn join<A, F>(executor: Arc<dyn Executor>, f: F) -> StartHandle<A>
where
    A: Clone + Send + 'static,
    F: FnOnce() -> Result<A> + Send + 'static,
{
    start(executor, f)
}

/// Applies `f` to every element, forks all applications, and collects the
/// results in input order.
///
/// The first failing application completes the result with its error;
/// remaining applications keep running but their results are discarded.
#[must_use]
pub fn parallel_traverse<T, A, F>(
    executor: Arc<dyn Executor>,
    items: impl IntoIterator<Item = T>,
    f: F,
) -> Receipt<Result<Vec<A>>>
where
    T: Send + 'static,
    A: Clone + Send + 'static,
    F: Fn(T) -> Result<A> + Send + Sync + 'static,
{
    let cell: Cell<Vec<A>> = Cell::new(Arc::clone(&executor));
    let receipt = cell.get();

    let items: Vec<T> = items.into_iter().collect();
    if items.is_empty() {
        cell.set_async_value(Vec::new());
        return receipt;
    }

    let total = items.len();
    let slots: Arc<Mutex<Vec<Option<A>>>> =
        Arc::new(Mutex::new(items.iter().map(|_| None).collect()));
    let remaining = Arc::new(AtomicUsize::new(total));
    // First branch to finish the traversal (last success or first failure)
    // wins this guard and alone assigns the output cell.
    let done = Arc::new(AtomicBool::new(false));
    let f = Arc::new(f);

    for (index, item) in items.into_iter().enumerate() {
        let cell = cell.clone();
        let slots = Arc::clone(&slots);
        let remaining = Arc::clone(&remaining);
        let done = Arc::clone(&done);
        let f = Arc::clone(&f);
        executor.execute(Box::new(move || match run_user(|| (*f)(item)) {
            Ok(value) => {
                slots.lock().expect("traverse slots poisoned")[index] = Some(value);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1
                    && done
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    let collected: Vec<A> = slots
                        .lock()
                        .expect("traverse slots poisoned")
                        .iter_mut()
                        .map(|slot| slot.take().expect("every slot filled"))
                        .collect();
                    cell.send_set(Ok(collected));
                }
            }
            Err(error) => {
                if done
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    cell.send_set(Err(error));
                } else {
                    trace!("late traverse failure discarded");
                }
            }
        }));
    }

    receipt
}

/// Forks every action and collects the results in input order.
#[must_use]
pub fn parallel_sequence<A, F>(
    executor: Arc<dyn Executor>,
    actions: Vec<F>,
) -> Receipt<Result<Vec<A>>>
where
    A: Clone + Send + 'static,
    F: FnOnce() -> Result<A> + Send + 'static,
{
    parallel_traverse(executor, actions, |action| action())
}
