//! Monotonic time sources for timeout arithmetic.
//!
//! The spin-wait and the controller's run timer only ever need "how much time
//! has passed since some fixed origin". [`MonotonicClock`] expresses exactly
//! that, so the same code can run against the real clock or a deterministic
//! one in tests.

use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic clock.
///
/// `now()` never goes backwards for a given instance. Reading it must be a
/// plain memory or vDSO read: it is called from inside busy-spin loops that are
/// not allowed to block.
pub trait MonotonicClock: Send + Sync {
    /// Time elapsed since this clock's origin.
    fn now(&self) -> Duration;
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for &C {
    #[inline]
    fn now(&self) -> Duration {
        (**self).now()
    }
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for Arc<C> {
    #[inline]
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Production clock backed by [`Instant`], anchored when constructed.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock for tests.
///
/// Time only moves when [`advance`](ManualClock::advance) is called, or, if
/// built with [`auto_advancing`](ManualClock::auto_advancing), by a fixed step
/// after every read. The latter lets a spin loop time out without any real
/// time passing.
///
/// ```
/// use std::time::Duration;
/// use axiom_lockprobe::clock::{ManualClock, MonotonicClock};
///
/// let clock = ManualClock::new();
/// assert_eq!(clock.now(), Duration::ZERO);
/// clock.advance(Duration::from_millis(30));
/// assert_eq!(clock.now(), Duration::from_millis(30));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
    step_ns: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock that moves forward by `step` after each read.
    pub fn auto_advancing(step: Duration) -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            step_ns: saturating_nanos(step),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ns.fetch_add(saturating_nanos(by), Ordering::SeqCst);
    }

    /// Number of whole steps taken so far (auto-advancing clocks only).
    pub fn reads(&self) -> u64 {
        if self.step_ns == 0 {
            return 0;
        }
        self.now_ns.load(Ordering::SeqCst) / self.step_ns
    }
}

impl MonotonicClock for ManualClock {
    #[inline]
    fn now(&self) -> Duration {
        let ns = if self.step_ns == 0 {
            self.now_ns.load(Ordering::SeqCst)
        } else {
            self.now_ns.fetch_add(self.step_ns, Ordering::SeqCst)
        };
        Duration::from_nanos(ns)
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
