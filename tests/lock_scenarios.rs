//! End-to-end behaviour of the bare `SpinLock`: the basic try/spin/release
//! scenarios on real threads and real time, plus a model check of
//! `try_acquire`/`release` sequences.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use axiom_lockprobe::SpinLock;
use proptest::prelude::*;

/// Generous bound on how far past its timeout a spin may return on a loaded
/// test machine.
const SLACK: Duration = Duration::from_millis(300);

#[test]
fn free_lock_is_acquired_once() {
    let lock = SpinLock::new();
    lock.init();
    assert!(lock.try_acquire());
    assert!(!lock.try_acquire());
}

#[test]
fn spin_on_held_lock_times_out() {
    let lock = SpinLock::new();
    assert!(lock.try_acquire());

    let start = Instant::now();
    let acquired = lock.busy_spin_wait_acquire(100);
    let elapsed = start.elapsed();

    assert!(!acquired);
    assert!(elapsed >= Duration::from_millis(100), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(100) + SLACK, "overshot: {elapsed:?}");
    assert!(lock.is_locked());
}

#[test]
fn spin_acquires_shortly_after_concurrent_release() {
    let lock = Arc::new(SpinLock::new());
    assert!(lock.try_acquire());

    let holder = {
        let lock = lock.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let released_at = Instant::now();
            lock.release();
            released_at
        })
    };

    let start = Instant::now();
    let acquired = lock.busy_spin_wait_acquire(1000);
    let acquired_at = Instant::now();
    let released_at = holder.join().unwrap();

    assert!(acquired, "spinner should get the lock after release");
    assert!(lock.is_locked());
    assert!(acquired_at >= released_at);
    assert!(acquired_at - released_at < SLACK, "slow to notice release");
    assert!(acquired_at - start < Duration::from_millis(1000), "spun for the whole timeout");
}

#[test]
fn zero_timeout_does_not_wait() {
    let lock = SpinLock::new();
    assert!(lock.busy_spin_wait_acquire(0));

    let start = Instant::now();
    assert!(!lock.busy_spin_wait_acquire(0));
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn ownership_alternates_strictly() {
    const CYCLES: u32 = 500;
    const A: u8 = 1;
    const B: u8 = 2;

    let lock = Arc::new(SpinLock::new());
    let turn = Arc::new(AtomicU8::new(A));
    let last_owner = Arc::new(AtomicU8::new(B));

    let side = |me: u8, other: u8| {
        let lock = lock.clone();
        let turn = turn.clone();
        let last_owner = last_owner.clone();
        thread::spawn(move || {
            for _ in 0..CYCLES {
                while turn.load(Ordering::SeqCst) != me {
                    std::hint::spin_loop();
                }
                assert!(lock.try_acquire(), "lock must be free on our turn");
                assert_eq!(last_owner.swap(me, Ordering::SeqCst), other);
                lock.release();
                turn.store(other, Ordering::SeqCst);
            }
        })
    };

    let a = side(A, B);
    let b = side(B, A);
    a.join().unwrap();
    b.join().unwrap();

    assert!(!lock.is_locked());
    assert_eq!(last_owner.load(Ordering::SeqCst), B);
}

#[derive(Debug, Clone, Copy)]
enum Op {
    TryAcquire,
    Release,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::TryAcquire), Just(Op::Release)]
}

proptest! {
    /// `try_acquire` succeeds exactly when the lock is free, and a failed
    /// attempt never changes it. Releases only happen while held.
    #[test]
    fn try_acquire_matches_model(ops in prop::collection::vec(op(), 0..64)) {
        let lock = SpinLock::new();
        let mut held = false;

        for op in ops {
            match op {
                Op::TryAcquire => {
                    let acquired = lock.try_acquire();
                    prop_assert_eq!(acquired, !held);
                    held = true;
                }
                Op::Release if held => {
                    lock.release();
                    held = false;
                    prop_assert!(lock.try_acquire(), "release then try_acquire must succeed");
                    lock.release();
                }
                Op::Release => {}
            }
            prop_assert_eq!(lock.is_locked(), held);
        }
    }
}
