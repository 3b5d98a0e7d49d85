//! # SpinLock
//!
//! A bare, single-owner lock that never blocks the calling thread. It holds no
//! data; it is only a shared 32-bit cell that is either `FREE` or `HELD`,
//! flipped with sequentially-consistent compare-and-swap.
//!
//! The lock offers three ways in and one way out:
//!
//! - [`SpinLock::try_acquire`]: one CAS, never waits.
//! - [`SpinLock::busy_spin_wait_acquire`]: keeps retrying the CAS until it
//!   succeeds or a wall-clock timeout elapses. This is the only way to *wait*
//!   for the lock from a context that may not perform a blocking wait: it
//!   trades CPU for the ability to wait at all.
//! - [`SpinLock::release`]: store `FREE`.
//!
//! ## The spin path
//! The spin loop contains atomic loads, CAS, [`BackOff`] pause hints and
//! clock reads, and nothing else. No futex, no park, no sleep and no yield is
//! reachable from it, so it is safe to call from a real-time callback as long
//! as the caller can afford to burn the whole timeout.
//!
//! ## Misuse
//! - Not reentrant: acquiring twice from the same owner fails (or spins out).
//! - Releasing a lock you do not hold is a contract violation. Debug builds
//!   panic; release builds leave the lock `FREE`.
//! - There is no fairness, queuing or priority inheritance.
//!
//! ## Example
//! ```rust
//! use axiom_lockprobe::SpinLock;
//!
//! static LOCK: SpinLock = SpinLock::new();
//!
//! assert!(LOCK.try_acquire());
//! assert!(!LOCK.try_acquire());
//! assert!(!LOCK.busy_spin_wait_acquire(5));
//! LOCK.release();
//! assert!(LOCK.busy_spin_wait_acquire(0));
//! LOCK.release();
//! ```

use core::fmt;
use core::sync::atomic::{
    AtomicU32,
    Ordering::{Relaxed, SeqCst},
};
use core::time::Duration;

use crate::clock::{MonotonicClock, SystemClock};
use crate::BackOff;

const FREE: u32 = 0;
const HELD: u32 = 1;

/// A binary exclusive lock with try, bounded busy-spin and release.
///
/// All operations are infallible at the type level: "failure" is a `false`
/// return meaning the lock was not acquired.
pub struct SpinLock {
    state: AtomicU32,
}

impl SpinLock {
    /// Creates a new, free lock.
    #[inline(always)]
    pub const fn new() -> Self {
        SpinLock {
            state: AtomicU32::new(FREE),
        }
    }

    /// Resets the cell to free.
    ///
    /// Must run before any contending context touches the lock; it is not
    /// safe to race with the other operations.
    #[inline]
    pub fn init(&self) {
        self.state.store(FREE, SeqCst);
    }

    /// Attempts to take the lock with a single compare-and-swap.
    ///
    /// Returns `true` if the caller now holds the lock. A `false` return leaves
    /// the lock untouched.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(FREE, HELD, SeqCst, SeqCst)
            .is_ok()
    }

    /// Spins on the lock for up to `timeout_ms` milliseconds of wall time.
    ///
    /// `timeout_ms == 0` is a single attempt, the same as
    /// [`try_acquire`](Self::try_acquire).
    ///
    /// # Example
    /// ```
    /// use axiom_lockprobe::SpinLock;
    ///
    /// let lock = SpinLock::new();
    /// assert!(lock.busy_spin_wait_acquire(100));
    /// assert!(!lock.busy_spin_wait_acquire(1));
    /// ```
    #[inline]
    pub fn busy_spin_wait_acquire(&self, timeout_ms: u64) -> bool {
        self.busy_spin_wait_acquire_with(&SystemClock::new(), Duration::from_millis(timeout_ms))
    }

    /// [`busy_spin_wait_acquire`](Self::busy_spin_wait_acquire) against an
    /// explicit clock.
    ///
    /// The deadline is `clock.now() + timeout`, sampled after the first failed
    /// attempt. Between attempts the loop issues a bounded [`BackOff`] burst, so
    /// a `false` return arrives at most one burst plus one clock read after
    /// the deadline.
    pub fn busy_spin_wait_acquire_with<C>(&self, clock: &C, timeout: Duration) -> bool
    where
        C: MonotonicClock + ?Sized,
    {
        if self.try_acquire() {
            return true;
        }

        let backoff = BackOff::new();
        let deadline = clock.now().saturating_add(timeout);
        while clock.now() < deadline {
            // test-and-test-and-set: only issue the CAS once the cell looks free
            if self.state.load(Relaxed) == FREE && self.try_acquire() {
                return true;
            }
            backoff.snooze();
        }
        false
    }

    /// Releases the lock.
    ///
    /// The caller must hold the lock. Releasing a free lock panics in debug
    /// builds and is otherwise a no-op on an already free cell.
    #[inline]
    pub fn release(&self) {
        let prev = self.state.swap(FREE, SeqCst);
        debug_assert_eq!(prev, HELD, "released a SpinLock that was not held");
    }

    /// Checks whether the lock is currently held.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.state.load(SeqCst) == HELD
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::SpinLock;

    #[test]
    fn test_try_acquire_on_free_then_held() {
        let lock = SpinLock::new();
        lock.init();

        assert!(lock.try_acquire(), "free lock should be acquired");
        assert!(lock.is_locked());
        assert!(!lock.try_acquire(), "held lock should not be acquired");
        assert!(!lock.try_acquire(), "failure must be idempotent");
        assert!(lock.is_locked(), "failed attempts must leave the lock held");
    }

    #[test]
    fn test_release_then_try_acquire_round_trip() {
        let lock = SpinLock::new();
        assert!(lock.try_acquire());
        for _ in 0..100 {
            lock.release();
            assert!(lock.try_acquire());
        }
    }

    #[test]
    fn test_zero_timeout_is_single_attempt() {
        let clock = ManualClock::auto_advancing(Duration::from_millis(1));
        let lock = SpinLock::new();

        assert!(lock.busy_spin_wait_acquire_with(&clock, Duration::ZERO));
        assert!(!lock.busy_spin_wait_acquire_with(&clock, Duration::ZERO));
        // one read for the deadline, one for the loop check
        assert_eq!(clock.reads(), 2);
    }

    #[test]
    fn test_spin_times_out_against_clock() {
        let clock = ManualClock::auto_advancing(Duration::from_millis(1));
        let lock = SpinLock::new();
        assert!(lock.try_acquire());

        assert!(!lock.busy_spin_wait_acquire_with(&clock, Duration::from_millis(100)));
        // deadline read at t=0, loop exits on the read that returns t=100
        assert_eq!(clock.reads(), 101);
        assert!(lock.is_locked());
    }

    #[test]
    fn test_owners_never_overlap() {
        const NONE: u8 = 0;
        const CYCLES: usize = 2_000;

        let lock = Arc::new(SpinLock::new());
        let owner = Arc::new(AtomicU8::new(NONE));
        let entries = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = [1u8, 2u8]
            .into_iter()
            .map(|me| {
                let lock = lock.clone();
                let owner = owner.clone();
                let entries = entries.clone();
                thread::spawn(move || {
                    for _ in 0..CYCLES {
                        assert!(lock.busy_spin_wait_acquire(1000));
                        let previous = owner.swap(me, Ordering::SeqCst);
                        assert_eq!(previous, NONE, "both sides hold the lock");
                        entries.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(owner.swap(NONE, Ordering::SeqCst), me);
                        lock.release();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(entries.load(Ordering::SeqCst), 2 * CYCLES);
        assert!(!lock.is_locked());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "not held")]
    fn test_release_unheld_panics_in_debug() {
        let lock = SpinLock::new();
        lock.release();
    }
}
