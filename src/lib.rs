//! Asyncell: an asynchronous single-assignment reference cell with
//! versioned updates.
//!
//! # Overview
//!
//! A [`Cell`] starts empty and is assigned a first value exactly once;
//! afterwards it may be reassigned any number of times. Reads issued while
//! the cell is empty park until the first assignment and are then delivered
//! in arrival order; reads issued afterwards complete immediately with the
//! latest value. A monotonic version counter stamps every read, turning
//! optimistic compare-and-set (and thus lock-free read-modify-write) into a
//! library-level construction.
//!
//! # Core Guarantees
//!
//! - **At-most-once delivery**: every reader parked at the first assignment
//!   receives that value exactly once, in the order the reads arrived
//! - **Serialized transitions**: a single-consumer mailbox linearises all
//!   state changes; no locks are contended on the hot path
//! - **Versioned reads**: a conditional set succeeds iff no assignment
//!   intervened since the read it was stamped by
//! - **Clean cancellation**: a cancelled read leaves no dangling callback
//!   and never fires
//! - **Safe racing**: the losing branch of a race keeps running, but its
//!   handle to the cell is severed so the cell can be reclaimed
//!
//! # Module Structure
//!
//! - [`cell`]: the cell state machine and its operations
//! - [`combinator`]: racing, background start, parallel collection
//! - [`completion`]: one-shot completion handles (blocking and `Future`)
//! - [`mailbox`]: single-consumer serializing dispatcher
//! - [`executor`]: the worker-pool abstraction callbacks dispatch onto
//! - [`error`]: the clonable failure type transported through cells
//! - [`test_utils`]: logging init and macros shared by the test suites
//!
//! # Example
//!
//! ```
//! use asyncell::{block_on, Cell, ThreadPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ThreadPool::new(2));
//! let counter: Cell<u64> = Cell::with_value(pool, 0);
//!
//! let change = block_on(counter.modify(|n| n + 1)).unwrap();
//! assert_eq!((change.previous, change.now), (0, 1));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod cell;
pub mod combinator;
pub mod completion;
pub mod error;
pub mod executor;
pub mod mailbox;
pub mod test_utils;
mod waiters;

// Re-exports for convenient access to core types
pub use cell::{CancelHandle, Cell, CellSetter, Change};
pub use combinator::{
    parallel_sequence, parallel_traverse, race, start, RaceResult, StartHandle,
};
pub use completion::{pair, Completer, Receipt};
pub use error::{Error, ErrorKind, Result};
pub use executor::{block_on, Executor, Job, ThreadPool};
pub use waiters::WaiterId;
