//! Error types for the lock probe.
//!
//! Every assertion the drivers make about the lock is a hard correctness
//! invariant. When one fails the run is over: there is no retry and no
//! recoverable category, only a [`ProbeError`] describing what went wrong.

use snafu::Snafu;

use crate::context::ExecutionContext;
use crate::sequencer::TestState;

/// Errors surfaced by a probe run.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProbeError {
    /// A lock operation returned something other than what the protocol
    /// guarantees at this point.
    #[snafu(display("{state}: {operation} returned {actual} (expected {expected})"))]
    AssertionFailed {
        /// State whose action made the call.
        state: TestState,
        /// Lock operation that was called.
        operation: &'static str,
        /// What the protocol requires.
        expected: bool,
        /// What the lock actually returned.
        actual: bool,
    },

    /// The renderer spun for the full timeout while the controller should
    /// have released the lock.
    #[snafu(display("WaitAcquire: lock not acquired within {timeout_ms}ms"))]
    WaitAcquireTimedOut {
        /// Spin timeout that elapsed.
        timeout_ms: u64,
    },

    /// The run finished faster than the busy-wait it must contain.
    #[snafu(display("run took {elapsed_ms}ms (expected > {minimum_ms}ms)"))]
    RunTooShort {
        /// Measured duration of the run.
        elapsed_ms: u64,
        /// Lower bound implied by the failing spin.
        minimum_ms: u64,
    },

    /// The run was force-terminated before reaching `Done` on its own.
    #[snafu(display("run terminated in state {state}"))]
    Terminated {
        /// State the run was in when terminated.
        state: TestState,
    },

    /// A driver was invoked from a thread marked as the other context.
    #[snafu(display("{driver} driver invoked from the {actual} context"))]
    WrongContext {
        /// Driver that was called.
        driver: ExecutionContext,
        /// Context the calling thread is marked with.
        actual: ExecutionContext,
    },

    /// Configuration rejected before starting a run.
    #[snafu(display("invalid probe configuration: {reason}"))]
    InvalidConfig {
        /// Why the configuration is invalid.
        reason: String,
    },

    /// The host could not start the thread for a context.
    #[snafu(display("failed to spawn the {role} thread: {message}"))]
    SpawnThread {
        /// Context the thread was for.
        role: ExecutionContext,
        /// OS error text.
        message: String,
    },

    /// A host thread panicked instead of returning.
    #[snafu(display("the {role} thread panicked"))]
    HostPanicked {
        /// Context the thread was running.
        role: ExecutionContext,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
