//! Concurrency Integration Tests
//!
//! Exercise the public primitives the way independent callers would:
//! - Handoff queue order and sentinel delivery under real threads
//! - Lock pair exclusion with many strict-order callers
//! - Opposite-order bounded waits making progress under contention
//! - Turn token exclusion and abandonment across handles
//!
//! # Running Tests
//! ```bash
//! cargo test --test concurrency_tests
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tandem_core::{
    AcquireOrder, ActorId, Backoff, CancelFlag, Message, OrderedLockPair, PairError, Resource,
    SignalQueue,
};

// ===== Handoff Queue =====

#[test]
fn test_fifo_order_and_single_sentinel() {
    let queue = Arc::new(SignalQueue::unbounded());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut received = Vec::new();
            loop {
                match queue.dequeue_blocking() {
                    Message::Data(n) => received.push(n),
                    Message::Done => return received,
                }
            }
        })
    };

    for n in 0..10_000u32 {
        queue.enqueue(Message::Data(n));
    }
    queue.enqueue(Message::Done);

    let received = consumer.join().unwrap();
    assert_eq!(received, (0..10_000).collect::<Vec<_>>());
    assert!(queue.is_empty());
    assert!(queue.try_dequeue().is_none(), "sentinel delivered twice");
    let stats = queue.stats();
    assert_eq!(stats.enqueued, 10_001);
    assert_eq!(stats.dequeued, 10_001);
}

#[test]
fn test_lockstep_queue_never_holds_more_than_one() {
    let queue = Arc::new(SignalQueue::bounded(1));
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for n in 0..2_000u32 {
                queue.enqueue_with_backpressure(Message::Data(n)).unwrap();
            }
            queue.enqueue_with_backpressure(Message::Done).unwrap();
        })
    };

    let mut expected = 0;
    while let Message::Data(n) = queue.dequeue_blocking() {
        assert_eq!(n, expected);
        expected += 1;
    }
    producer.join().unwrap();

    assert_eq!(expected, 2_000);
    assert_eq!(queue.stats().high_water, 1);
}

// ===== Ordered Lock Pair =====

#[test]
fn test_strict_order_many_callers_complete() {
    let pair = OrderedLockPair::new(0u64, 0u64);
    let inside = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let actor = ActorId::next();
                for _ in 0..1_000 {
                    pair.with_both(actor, |a, b| {
                        assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                        *a += 1;
                        *b += 1;
                        inside.store(false, Ordering::SeqCst);
                    });
                }
            });
        }
    });

    assert_eq!(pair.stats().paired_runs, 8_000);
    assert_eq!(pair.into_inner(), (8_000, 8_000));
}

#[test]
fn test_opposite_orders_both_make_progress() {
    let pair = OrderedLockPair::new(Vec::new(), Vec::new());
    let backoff = Backoff {
        max_attempts: 10_000,
        base: Duration::from_micros(10),
        cap: Duration::from_micros(500),
    };
    let successes = [AtomicUsize::new(0), AtomicUsize::new(0)];

    thread::scope(|s| {
        for (worker, order) in [AcquireOrder::AThenB, AcquireOrder::BThenA]
            .into_iter()
            .enumerate()
        {
            let pair = &pair;
            let backoff = &backoff;
            let successes = &successes;
            s.spawn(move || {
                let actor = ActorId::next();
                for n in 0..500u32 {
                    let outcome = pair.retry_with_both(
                        actor,
                        order,
                        Duration::from_millis(1),
                        backoff,
                        |texts: &mut Vec<String>, numbers: &mut Vec<u32>| {
                            texts.push(format!("Next value is: {}", n));
                            numbers.push(n);
                        },
                    );
                    outcome.unwrap();
                    successes[worker].fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(successes[0].load(Ordering::Relaxed), 500);
    assert_eq!(successes[1].load(Ordering::Relaxed), 500);
    let (texts, numbers) = pair.into_inner();
    assert_eq!(texts.len(), numbers.len());
    assert_eq!(texts.len(), 1_000);
}

#[test]
fn test_timed_out_attempt_leaves_both_free() {
    let pair = OrderedLockPair::new((), ());
    let holder = ActorId::next();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    thread::scope(|s| {
        let pair = &pair;
        s.spawn(move || {
            pair.with_both(holder, |_, _| {
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            });
        });
        locked_rx.recv().unwrap();

        let timeout = Duration::from_millis(10);
        let err = pair
            .try_with_both(ActorId::next(), AcquireOrder::BThenA, timeout, |_, _| ())
            .unwrap_err();
        assert!(matches!(
            err,
            PairError::LockTimeout {
                resource: Resource::B,
                held: None,
                ..
            }
        ));
        release_tx.send(()).unwrap();
    });

    // Nothing is left held by either caller.
    assert!(pair
        .try_with_both(ActorId::next(), AcquireOrder::AThenB, Duration::ZERO, |_, _| ())
        .is_ok());
    assert!(pair
        .try_with_both(ActorId::next(), AcquireOrder::BThenA, Duration::ZERO, |_, _| ())
        .is_ok());
}

#[test]
fn test_cancel_flag_stops_worker_loop() {
    let cancel = CancelFlag::new();
    let pair = OrderedLockPair::new(0u64, 0u64);

    let iterations = thread::scope(|s| {
        let worker = s.spawn(|| {
            let actor = ActorId::next();
            let mut iterations = 0u64;
            while !cancel.is_cancelled() {
                pair.with_both(actor, |a, b| {
                    *a += 1;
                    *b += 1;
                });
                iterations += 1;
            }
            iterations
        });
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        worker.join().unwrap()
    });

    let (a, b) = pair.into_inner();
    assert_eq!(a, iterations);
    assert_eq!(b, iterations);
}

// ===== Turn Token =====

#[cfg(unix)]
mod turn_token {
    use super::*;
    use tandem_core::scenario::turn_passing::{verify_ledger, TurnLedger};
    use tandem_core::{Acquisition, TurnError, TurnToken};
    use tempfile::tempdir;

    #[test]
    fn test_parties_take_turns_without_overlap() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join("turns.ledger");
        TurnLedger::reset(&ledger_path).unwrap();

        thread::scope(|s| {
            for _ in 0..3 {
                let dir = dir.path();
                let ledger_path = &ledger_path;
                s.spawn(move || {
                    let mut token = TurnToken::open(dir, "shared").unwrap();
                    let mut ledger = TurnLedger::open(ledger_path).unwrap();
                    for _ in 0..20 {
                        token.acquire().unwrap();
                        ledger.begin(token.owner_id()).unwrap();
                        thread::yield_now();
                        ledger.end(token.owner_id()).unwrap();
                        token.release().unwrap();
                    }
                    token.close().unwrap();
                });
            }
        });

        let summary = verify_ledger(&ledger_path).unwrap();
        assert_eq!(summary.intervals, 60);
        assert_eq!(summary.distinct_owners, 3);
    }

    #[test]
    fn test_abandoned_token_reported_once() {
        let dir = tempdir().unwrap();
        let mut first = TurnToken::open(dir.path(), "left-behind").unwrap();
        first.acquire().unwrap();
        let previous = first.owner_id();
        drop(first);

        let mut second = TurnToken::open(dir.path(), "left-behind").unwrap();
        assert_eq!(
            second.acquire().unwrap(),
            Acquisition::Abandoned {
                previous: Some(previous)
            }
        );
        second.release().unwrap();

        let mut third = TurnToken::open(dir.path(), "left-behind").unwrap();
        assert_eq!(third.acquire().unwrap(), Acquisition::Clean);
        third.close().unwrap();
    }

    #[test]
    fn test_non_owner_release_keeps_owner_state() {
        let dir = tempdir().unwrap();
        let mut owner = TurnToken::open(dir.path(), "strict").unwrap();
        let mut other = TurnToken::open(dir.path(), "strict").unwrap();

        owner.acquire().unwrap();
        assert!(matches!(
            other.release(),
            Err(TurnError::OwnershipViolation { .. })
        ));
        assert_eq!(other.try_acquire().unwrap(), None);
        assert_eq!(owner.peek_owner(), Some(owner.owner_id()));
        owner.close().unwrap();
        assert_eq!(other.try_acquire().unwrap(), Some(Acquisition::Clean));
        other.close().unwrap();
    }
}
