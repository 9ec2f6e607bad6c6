//! End-to-end suite for the cell and its combinators.
//!
//! Covers the externally observable contract:
//! - **Set-then-get**: assignments are visible to later reads
//! - **Waiter broadcast**: every read parked at the first assignment is
//!   delivered exactly once
//! - **CAS contention**: concurrent read-modify-write loses no updates
//! - **Cancellation**: a cancelled read never fires, and only that read
//! - **Racing**: first completion wins, the loser never overwrites

use asyncell::test_utils::{init_test_logging, test_pool};
use asyncell::{
    block_on, parallel_sequence, parallel_traverse, race, start, Cell, Change, Error, Executor,
    RaceResult, ThreadPool,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    asyncell::test_phase!(name);
}

/// Set-then-get: a set value is observed by any number of later reads.
#[test]
fn set_then_get() {
    init_test("set_then_get");
    let cell: Cell<u32> = Cell::new(test_pool());
    cell.set_async_value(42);

    for _ in 0..5 {
        assert_eq!(cell.get().wait().expect("value present"), 42);
    }
    asyncell::test_complete!("set_then_get");
}

/// Waiter broadcast: reads parked before the first assignment all receive
/// the first value.
#[test]
fn waiter_broadcast() {
    init_test("waiter_broadcast");
    let cell: Cell<String> = Cell::new(test_pool());

    // All sends originate here, so the three reads are registered before
    // the set is handled.
    let readers: Vec<_> = (0..3).map(|_| cell.get()).collect();
    cell.set_async_value("x".to_string());

    for reader in readers {
        assert_eq!(reader.wait().expect("broadcast"), "x");
    }

    // Late reader is served from the stored value.
    assert_eq!(cell.get().wait().expect("memoised"), "x");
    asyncell::test_complete!("waiter_broadcast");
}

/// CAS contention: N concurrent `modify(n + 1)` calls produce a final value
/// of exactly N, and every call observes a distinct consecutive change.
#[test]
fn cas_contention_counts_exactly() {
    init_test("cas_contention_counts_exactly");
    const THREADS: usize = 10;
    const PER_THREAD: usize = 100;

    let cell = Cell::with_value(test_pool(), 0u64);
    let changes: Arc<Mutex<Vec<Change<u64>>>> = Arc::new(Mutex::new(Vec::new()));

    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let cell = cell.clone();
        let changes = Arc::clone(&changes);
        workers.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                let change = block_on(cell.modify(|n| n + 1)).expect("no failure");
                changes.lock().unwrap().push(change);
            }
        }));
    }
    for worker in workers {
        worker.join().expect("modifier panicked");
    }

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(cell.get().wait().expect("value present"), total);

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len() as u64, total);
    for change in changes.iter() {
        assert_eq!(change.previous + 1, change.now, "consecutive change");
    }
    let distinct: HashSet<u64> = changes.iter().map(|c| c.previous).collect();
    assert_eq!(distinct.len() as u64, total, "every call saw a distinct state");
    asyncell::test_complete!("cas_contention_counts_exactly");
}

/// Cancellation: the cancelled read never fires; other reads are untouched.
#[test]
fn cancelled_read_never_fires() {
    init_test("cancelled_read_never_fires");
    let cell: Cell<u32> = Cell::new(test_pool());

    let (read, cancel) = cell.get_cancellable();
    assert!(cancel.cancel().wait(), "read was parked");

    cell.set_async_value(7);

    assert!(
        read.wait_timeout(Duration::from_millis(80)).is_err(),
        "cancelled read must not complete"
    );
    assert_eq!(cell.get().wait().expect("value present"), 7);
    asyncell::test_complete!("cancelled_read_never_fires");
}

/// Cancellation after delivery is harmless and reports `found = false`.
#[test]
fn cancel_after_delivery_is_noop() {
    init_test("cancel_after_delivery_is_noop");
    let cell = Cell::with_value(test_pool(), 3u32);

    let (read, cancel) = cell.get_cancellable();
    assert_eq!(read.wait().expect("value present"), 3);
    assert!(!cancel.cancel().wait(), "nothing left to cancel");
    asyncell::test_complete!("cancel_after_delivery_is_noop");
}

/// A reader doing repeated gets observes a non-decreasing sequence while a
/// writer publishes increasing values.
#[test]
fn repeated_reads_are_monotone() {
    init_test("repeated_reads_are_monotone");
    let cell = Cell::with_value(test_pool(), 0u64);

    let writer_cell = cell.clone();
    let writer = thread::spawn(move || {
        for n in 1..=100u64 {
            writer_cell.set_sync_value(n).wait();
        }
    });

    let mut last = 0u64;
    for _ in 0..200 {
        let seen = cell.get().wait().expect("value present");
        assert!(seen >= last, "reads went backwards: {seen} < {last}");
        last = seen;
    }

    writer.join().expect("writer panicked");
    assert_eq!(cell.get().wait().expect("value present"), 100);
    asyncell::test_complete!("repeated_reads_are_monotone");
}

/// An access setter succeeds iff no assignment intervened.
#[test]
fn access_setter_linearizes_against_writers() {
    init_test("access_setter_linearizes_against_writers");
    let cell = Cell::with_value(test_pool(), 1u32);

    let (value, clean) = cell.access().wait().expect("value present");
    assert_eq!(value, 1);
    assert!(clean.set(Ok(2)).wait(), "no writer intervened");

    let (_, stale) = cell.access().wait().expect("value present");
    cell.set_sync_value(50).wait();
    assert!(!stale.set(Ok(3)).wait(), "writer intervened");
    assert_eq!(cell.get().wait().expect("value present"), 50);
    asyncell::test_complete!("access_setter_linearizes_against_writers");
}

/// Race winner-set: the earlier completion wins and the loser's result is
/// discarded, not applied late.
#[test]
fn race_winner_is_kept() {
    init_test("race_winner_is_kept");
    let result = race(
        test_pool(),
        || {
            thread::sleep(Duration::from_millis(10));
            Ok("a")
        },
        || {
            thread::sleep(Duration::from_millis(50));
            Ok("b")
        },
    );

    let winner = result.wait().expect("winner succeeded");
    assert_eq!(winner, RaceResult::First("a"));
    asyncell::test_complete!("race_winner_is_kept");
}

/// The loser never overwrites, observed through a shared cell.
#[test]
fn race_loser_never_overwrites() {
    init_test("race_loser_never_overwrites");
    let cell: Cell<&'static str> = Cell::new(test_pool());
    cell.race(
        || {
            thread::sleep(Duration::from_millis(10));
            Ok("winner")
        },
        || {
            thread::sleep(Duration::from_millis(40));
            Ok("loser")
        },
    );

    assert_eq!(cell.get().wait().expect("winner set"), "winner");
    thread::sleep(Duration::from_millis(80));
    assert_eq!(cell.get().wait().expect("still winner"), "winner");
    asyncell::test_complete!("race_loser_never_overwrites");
}

/// Race with failure: whichever completion linearizes first wins, including
/// a failing one.
#[test]
fn race_first_completion_wins_even_failure() {
    init_test("race_first_completion_wins_even_failure");

    // Immediate failure against a slow success: the failure wins.
    let fast_failure = race(
        test_pool(),
        || -> asyncell::Result<u32> { Err(Error::message("fast failure")) },
        || {
            thread::sleep(Duration::from_millis(50));
            Ok("slow")
        },
    );
    assert!(fast_failure.wait().is_err());

    // Slow failure against a fast success: the success wins.
    let fast_success = race(
        test_pool(),
        || -> asyncell::Result<u32> {
            thread::sleep(Duration::from_millis(50));
            Err(Error::message("slow failure"))
        },
        || Ok("fast"),
    );
    assert_eq!(
        fast_success.wait().expect("success was first"),
        RaceResult::Second("fast")
    );
    asyncell::test_complete!("race_first_completion_wins_even_failure");
}

/// Start: one background run, result broadcast to every reader, including
/// readers from other threads and readers arriving after completion.
#[test]
fn start_memoises_and_broadcasts() {
    init_test("start_memoises_and_broadcasts");
    let runs = Arc::new(Mutex::new(0u32));
    let counted = Arc::clone(&runs);
    let handle = start(test_pool(), move || {
        *counted.lock().unwrap() += 1;
        thread::sleep(Duration::from_millis(10));
        Ok(777u32)
    });

    let mut readers = Vec::new();
    for _ in 0..3 {
        let handle = handle.clone();
        readers.push(thread::spawn(move || {
            handle.get().wait().expect("broadcast")
        }));
    }
    for reader in readers {
        assert_eq!(reader.join().expect("reader panicked"), 777);
    }

    // Late arrival after completion.
    assert_eq!(handle.get().wait().expect("memoised"), 777);
    assert_eq!(*runs.lock().unwrap(), 1, "the computation ran once");
    asyncell::test_complete!("start_memoises_and_broadcasts");
}

/// Parallel traversal keeps input order regardless of completion order.
#[test]
fn parallel_traverse_collects_everything() {
    init_test("parallel_traverse_collects_everything");
    let result = parallel_traverse(test_pool(), 0u64..32, |n| {
        thread::sleep(Duration::from_millis((32 - n) % 7));
        Ok(n * n)
    })
    .wait()
    .expect("all elements succeed");

    let expected: Vec<u64> = (0..32).map(|n| n * n).collect();
    assert_eq!(result, expected);
    asyncell::test_complete!("parallel_traverse_collects_everything");
}

/// Parallel sequence forks ready-made actions.
#[test]
fn parallel_sequence_collects_everything() {
    init_test("parallel_sequence_collects_everything");
    let actions: Vec<_> = (0..10u32)
        .map(|n| move || -> asyncell::Result<u32> { Ok(n) })
        .collect();
    let result = parallel_sequence(test_pool(), actions)
        .wait()
        .expect("all actions succeed");
    assert_eq!(result, (0..10).collect::<Vec<_>>());
    asyncell::test_complete!("parallel_sequence_collects_everything");
}

/// A failed computation is transported verbatim to parked and late readers.
#[test]
fn failure_transport_to_all_readers() {
    init_test("failure_transport_to_all_readers");
    let cell: Cell<u32> = Cell::new(test_pool());
    let parked = cell.get();

    cell.set_async(|| Err(Error::message("fetch failed")));

    let err = parked.wait().expect_err("parked reader sees the failure");
    assert_eq!(err.to_string(), "user computation failed: fetch failed");
    let err = cell.get().wait().expect_err("late reader sees it too");
    assert_eq!(err.to_string(), "user computation failed: fetch failed");
    asyncell::test_complete!("failure_transport_to_all_readers");
}

/// The executor is caller-supplied: a custom implementation works end to
/// end.
#[test]
fn custom_executor_is_honoured() {
    init_test("custom_executor_is_honoured");

    /// Forwards jobs to an inner pool, counting them.
    struct CountingExecutor {
        inner: ThreadPool,
        submitted: Mutex<usize>,
    }

    impl Executor for CountingExecutor {
        fn execute(&self, job: asyncell::Job) {
            *self.submitted.lock().unwrap() += 1;
            self.inner.execute(job);
        }
    }

    let executor = Arc::new(CountingExecutor {
        inner: ThreadPool::new(2),
        submitted: Mutex::new(0),
    });

    let cell: Cell<u32> = Cell::new(executor.clone());
    cell.set_async_value(11);
    assert_eq!(cell.get().wait().expect("value present"), 11);

    assert!(
        *executor.submitted.lock().unwrap() > 0,
        "cell dispatched through the supplied executor"
    );
    asyncell::test_complete!("custom_executor_is_honoured");
}
