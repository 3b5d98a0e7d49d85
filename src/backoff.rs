//! # BackOff
//!
//! A bounded exponential spin backoff for the busy-wait path of
//! [`SpinLock::busy_spin_wait_acquire`](crate::SpinLock::busy_spin_wait_acquire).
//!
//! Every call to [`BackOff::snooze`] issues a burst of
//! [`core::hint::spin_loop`] pause hints and doubles the next burst, up to
//! [`MAX_SPIN`]. Unlike a general-purpose backoff it **never** yields the
//! thread or parks: the caller may be running in a context where any
//! scheduler interaction is forbidden, so the only thing this type ever does
//! is burn cycles.
//!
//! The cap keeps a single burst in the low-microsecond range so the caller can
//! re-sample its clock often enough for the realised spin to stay close to the
//! requested timeout.
//!
//! ## Example
//! ```rust
//! use axiom_lockprobe::BackOff;
//!
//! let backoff = BackOff::new();
//! let mut attempts = 0;
//! loop {
//!     attempts += 1;
//!     if attempts == 4 {
//!         break;
//!     }
//!     backoff.snooze();
//! }
//! assert!(backoff.current() > 1);
//! ```

use core::{cell::Cell, hint::spin_loop};

/// Upper bound on the pause hints issued by a single [`BackOff::snooze`].
pub const MAX_SPIN: u32 = 1 << 10;

/// Default starting burst.
const START_VALUE: u32 = 1;

/// A bounded exponential spin backoff.
///
/// Holds the length of the next burst. Not `Sync`: each spinning caller owns
/// its own instance on the stack.
pub struct BackOff {
    spin: Cell<u32>,
}

impl BackOff {
    /// Creates a new [`BackOff`] starting with a single pause hint.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            spin: Cell::new(START_VALUE),
        }
    }

    /// Spins for the current burst length, then doubles it (saturating at
    /// [`MAX_SPIN`]).
    #[inline(always)]
    pub fn snooze(&self) {
        let end = self.spin.get();

        for _ in 0..end {
            spin_loop();
        }

        self.spin.set((end << 1).min(MAX_SPIN));
    }

    /// Returns the length of the next burst.
    #[inline(always)]
    pub fn current(&self) -> u32 {
        self.spin.get()
    }
}

impl Default for BackOff {
    fn default() -> Self {
        Self::new()
    }
}
