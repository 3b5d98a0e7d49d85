//! # axiom-lockprobe 🌀
//!
//! A minimal **busy-spin lock** and a **two-context rendezvous probe** that
//! proves the lock's contention and timeout behaviour between a real-time
//! thread that may never block and a controller thread that may.
//!
//! The crate includes:
//!
//! - [`SpinLock`]: a bare Free/Held cell with `try_acquire`, a bounded
//!   `busy_spin_wait_acquire` and `release`.
//! - [`BackOff`]: bounded pause-hint backoff for the spin path. Never yields.
//! - [`ProbeContext`]: the shared state of one run plus the renderer and
//!   controller drivers that walk it through a fixed sequence of lock checks.
//! - [`host`]: threads that play the renderer and controller, and a
//!   [`Harness`] to begin and terminate runs.
//!
//! ## 🚀 Quick Example
//!
//! ```rust,no_run
//! use axiom_lockprobe::{run_probe, ProbeConfig};
//!
//! let report = run_probe(ProbeConfig::default()).unwrap();
//! assert!(report.is_success(), "{report}");
//! ```
//!
//! ## 🧠 Design
//!
//! ### SpinLock
//!
//! One [`AtomicU32`](core::sync::atomic::AtomicU32) flipped with
//! sequentially-consistent CAS. The spin-wait only ever executes atomics,
//! CPU pause hints and monotonic clock reads, so calling it cannot park the
//! thread. The price is that it burns CPU for the whole timeout.
//!
//! ### The rendezvous
//!
//! The controller takes the lock before the renderer starts. The renderer
//! then checks, in order, that `try_acquire` fails, that a 100ms spin times
//! out, that a 1000ms spin succeeds once the controller releases mid-spin, and
//! that release-then-try succeeds. Any deviation is fatal and ends the run.
//!
//! ## ⚠️ Usage Notes
//!
//! - `SpinLock` is **not reentrant** and has no fairness.
//! - Releasing a lock you do not hold is a bug, caught by `debug_assert!`.
//! - Only spin from a real-time context if you can afford the full timeout.
//!
//! ## 📦 Modules
//!
//! - [`backoff`]: bounded spin backoff.
//! - [`clock`]: monotonic clock capability.
//! - [`config`]: run configuration.
//! - [`context`]: renderer/controller thread markers.
//! - [`error`]: [`ProbeError`].
//! - [`host`]: thread host and harness.
//! - [`report`]: [`RunReport`].
//! - [`sequencer`]: the state machine and drivers.
//! - [`spinlock`]: the lock.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod report;
pub mod sequencer;
pub mod spinlock;

pub use backoff::BackOff;
pub use config::ProbeConfig;
pub use error::{ProbeError, Result};
pub use host::{run_probe, Harness, RunHandle};
pub use report::RunReport;
pub use sequencer::{Flow, ProbeContext, TestState};
pub use spinlock::SpinLock;
