//! One-shot completion handles: the crate's "asynchronous value".
//!
//! [`pair`] creates a linked [`Completer`] / [`Receipt`]. The completer is
//! consumed by delivering exactly one value; the receipt observes it either
//! by blocking ([`Receipt::wait`], [`Receipt::wait_timeout`]) or as a
//! [`Future`], so the crate is usable with or without an async runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    COMPLETER / RECEIPT                       │
//! │                                                              │
//! │   Producer                              Consumer             │
//! │     │                                      │                 │
//! │     │─── complete(v) ── notify + wake ────►├─ wait() ──► v   │
//! │     │                                      ├─ .await  ──► v  │
//! │                                                              │
//! │   (never fires, e.g. cancelled read) ────► wait_timeout err  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A receipt whose producer never fires (a cancelled read, or a computation
//! whose pool was shut down underneath it) stays pending forever;
//! [`Receipt::wait_timeout`] is the bounded way to observe that.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct Shared<T> {
    state: Mutex<State<T>>,
    signal: Condvar,
}

struct State<T> {
    /// The delivered value, until the receipt takes it.
    value: Option<T>,
    /// Waker of a pending `Future` poll.
    waker: Option<Waker>,
    /// Set once `complete` has run; survives the value being taken.
    completed: bool,
}

/// Creates a linked completer/receipt pair.
#[must_use]
pub fn pair<T>() -> (Completer<T>, Receipt<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            value: None,
            waker: None,
            completed: false,
        }),
        signal: Condvar::new(),
    });
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        Receipt { shared },
    )
}

/// The producing half: delivers exactly one value.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
    /// Delivers the value, waking the receipt's waiter if any.
    pub fn complete(self, value: T) {
        let waker = {
            let mut state = self.shared.state.lock().expect("completion state poisoned");
            state.value = Some(value);
            state.completed = true;
            state.waker.take()
        };
        self.shared.signal.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

/// The consuming half: observes the delivered value once.
///
/// # Cancel Safety
///
/// Dropping a receipt abandons the observation; the producer's `complete`
/// still runs and is simply unobserved. No state is shared beyond the pair.
pub struct Receipt<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receipt<T> {
    /// Returns true once the producer has fired, even if the value was
    /// already taken.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared
            .state
            .lock()
            .expect("completion state poisoned")
            .completed
    }

    /// Takes the value if it has been delivered and not yet consumed.
    #[must_use]
    pub fn try_take(&self) -> Option<T> {
        self.shared
            .state
            .lock()
            .expect("completion state poisoned")
            .value
            .take()
    }

    /// Blocks until the value is delivered.
    ///
    /// If the producer never fires, this blocks forever; prefer
    /// [`Receipt::wait_timeout`] when that is a reachable state.
    pub fn wait(self) -> T {
        let mut state = self.shared.state.lock().expect("completion state poisoned");
        while state.value.is_none() {
            state = self
                .shared
                .signal
                .wait(state)
                .expect("completion state poisoned");
        }
        state.value.take().expect("value present after wait")
    }

    /// Blocks until the value is delivered or the timeout elapses.
    ///
    /// On timeout the receipt is handed back so the caller can retry.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, Self> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().expect("completion state poisoned");
        while state.value.is_none() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                drop(state);
                return Err(self);
            };
            let (guard, wait_result) = self
                .shared
                .signal
                .wait_timeout(state, remaining)
                .expect("completion state poisoned");
            state = guard;
            if wait_result.timed_out() && state.value.is_none() {
                drop(state);
                return Err(self);
            }
        }
        let value = state.value.take().expect("value present after wait");
        drop(state);
        Ok(value)
    }
}

impl<T> Future for Receipt<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.shared.state.lock().expect("completion state poisoned");
        if let Some(value) = state.value.take() {
            return Poll::Ready(value);
        }
        match &state.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Receipt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receipt")
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use std::thread;

    #[test]
    fn wait_returns_delivered_value() {
        let (tx, rx) = pair();
        tx.complete(42);
        assert_eq!(rx.wait(), 42);
    }

    #[test]
    fn wait_blocks_until_completion() {
        let (tx, rx) = pair();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.complete("late");
        });
        assert_eq!(rx.wait(), "late");
        producer.join().expect("producer panicked");
    }

    #[test]
    fn wait_timeout_returns_receipt_when_pending() {
        let (tx, rx) = pair::<i32>();
        let rx = rx
            .wait_timeout(Duration::from_millis(10))
            .expect_err("nothing delivered yet");
        tx.complete(7);
        assert_eq!(rx.wait(), 7);
    }

    #[test]
    fn try_take_is_none_until_complete() {
        let (tx, rx) = pair();
        assert!(rx.try_take().is_none());
        assert!(!rx.is_complete());
        tx.complete(1);
        assert!(rx.is_complete());
        assert_eq!(rx.try_take(), Some(1));
        // Consumed: completion flag survives, value does not.
        assert!(rx.is_complete());
        assert!(rx.try_take().is_none());
    }

    #[test]
    fn future_resolves_on_completion() {
        let (tx, rx) = pair();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.complete(99);
        });
        assert_eq!(block_on(rx), 99);
        producer.join().expect("producer panicked");
    }

    #[test]
    fn future_resolves_immediately_when_already_complete() {
        let (tx, rx) = pair();
        tx.complete("ready");
        assert_eq!(block_on(rx), "ready");
    }

    #[test]
    fn value_is_moved_not_cloned() {
        #[derive(Debug, PartialEq)]
        struct NonClone(u8);

        let (tx, rx) = pair();
        tx.complete(NonClone(3));
        assert_eq!(rx.wait(), NonClone(3));
    }
}
