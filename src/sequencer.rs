//! # TestSequencer
//!
//! A fixed rendezvous protocol that proves the [`SpinLock`]'s contention and
//! timeout behaviour between two contexts: a renderer that must never block
//! and a controller that ticks on a coarse timer and may sleep.
//!
//! Both sides share one [`ProbeContext`]. The only thing they communicate
//! through is the [`TestState`] cell and the lock itself:
//!
//! ```text
//! Loading -> NotStarted -> TryAcquire -> WaitAcquireFail -> WaitAcquire -> Release -> Done
//!               ^                                                            |
//!               +------------------------ (repeating runs) -------------------+
//! ```
//!
//! ## Single writer per value
//! The state cell is not guarded by a second lock. It is correct because each
//! value has exactly one writer, so the two sides never race on a store:
//!
//! | value stored        | written by                                         |
//! |---------------------|----------------------------------------------------|
//! | `Loading`           | [`ProbeContext::start`], before either driver runs |
//! | `NotStarted`        | renderer (after `Loading`, or after `Release`)     |
//! | `TryAcquire`        | controller                                         |
//! | `WaitAcquireFail`   | renderer                                           |
//! | `WaitAcquire`       | renderer                                           |
//! | `Release`           | renderer                                           |
//! | `Done`              | renderer, or the abort path                        |
//!
//! The abort path ([`ProbeContext::terminate`], or a failed assertion on either
//! side) may force `Done` at any time. Regular transitions are therefore a
//! compare-and-swap from the state the driver acted on, so a forced `Done` is
//! never overwritten. A terminated `Done` carries the interrupted state in the
//! same cell, so nobody can observe `Done` without also seeing why.
//!
//! ## Trace
//! Each driver records the state it acts on before doing that state's work,
//! and before it stores the next one. The other side can only act on a state
//! after it has been stored, so the trace is in protocol order. `Done` is not
//! recorded by either driver; [`ProbeContext::transitions`] appends it once
//! the run has finished.
//!
//! ## Lock ownership
//! The controller takes the lock in [`ProbeContext::start`] and keeps it
//! through `TryAcquire` and `WaitAcquireFail`, which both expect the renderer
//! to fail. It releases during `WaitAcquire`, while the renderer is already
//! spinning, and the renderer's spin must then succeed. In repeating runs the
//! renderer hands the lock back at the end of `Release` and the controller
//! retakes it at `NotStarted`.

use core::fmt;
use core::time::Duration;
use std::sync::atomic::{
    AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering::SeqCst,
};

use tracing::{debug, error, info, trace, warn};

use crate::clock::{MonotonicClock, SystemClock};
use crate::config::ProbeConfig;
use crate::context::{self, ExecutionContext};
use crate::error::{ProbeError, Result};
use crate::report::RunReport;
use crate::SpinLock;

/// Where the rendezvous currently is.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestState {
    /// Waiting for the renderer to come up.
    Loading = 0,
    /// Renderer is ready; waiting for the controller to start a cycle.
    NotStarted = 1,
    /// Controller holds the lock; renderer's `try_acquire` must fail.
    TryAcquire = 2,
    /// Controller still holds the lock; renderer's spin must time out.
    WaitAcquireFail = 3,
    /// Controller releases while the renderer spins; the spin must succeed.
    WaitAcquire = 4,
    /// Renderer releases and confirms the lock is free again.
    Release = 5,
    /// Finished, successfully or not.
    Done = 6,
}

impl TestState {
    /// Every state in protocol order.
    pub const ALL: [TestState; 7] = [
        TestState::Loading,
        TestState::NotStarted,
        TestState::TryAcquire,
        TestState::WaitAcquireFail,
        TestState::WaitAcquire,
        TestState::Release,
        TestState::Done,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestState::Loading => "Loading",
            TestState::NotStarted => "NotStarted",
            TestState::TryAcquire => "TryAcquire",
            TestState::WaitAcquireFail => "WaitAcquireFail",
            TestState::WaitAcquire => "WaitAcquire",
            TestState::Release => "Release",
            TestState::Done => "Done",
        }
    }

    /// The side that owns regular transitions *into* this state.
    pub fn writer(self) -> ExecutionContext {
        match self {
            // Loading is stored by start(), which runs on the controller side
            TestState::Loading | TestState::TryAcquire => ExecutionContext::Controller,
            _ => ExecutionContext::Renderer,
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a driver wants to be invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

const STATE_MASK: u8 = 0b0000_0111;
const FROM_SHIFT: u32 = 3;
const TERMINATED: u8 = 0b1000_0000;

/// The shared state cell. All accesses are sequentially consistent.
///
/// The low bits hold the current [`TestState`]. When the run is terminated,
/// the cell also records the state that was interrupted, set in the same
/// atomic write as `Done`.
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub const fn new(state: TestState) -> Self {
        SharedState(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> TestState {
        decode(self.0.load(SeqCst))
    }

    /// Overwrites the cell, clearing any termination record.
    #[inline]
    pub fn store(&self, state: TestState) {
        self.0.store(state as u8, SeqCst);
    }

    /// Moves `from -> to` only if the cell still holds `from`.
    #[inline]
    pub fn advance(&self, from: TestState, to: TestState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, SeqCst, SeqCst)
            .is_ok()
    }

    /// Forces `Done` unless the cell already holds it, returning the state
    /// that was replaced. With `terminated` set, the replaced state is kept
    /// in the cell for [`terminated_in`](Self::terminated_in).
    pub fn force_done(&self, terminated: bool) -> Option<TestState> {
        let mut raw = self.0.load(SeqCst);
        loop {
            let current = decode(raw);
            if current == TestState::Done {
                return None;
            }
            let next = if terminated {
                TestState::Done as u8 | TERMINATED | ((current as u8) << FROM_SHIFT)
            } else {
                TestState::Done as u8
            };
            match self.0.compare_exchange_weak(raw, next, SeqCst, SeqCst) {
                Ok(_) => return Some(current),
                Err(actual) => raw = actual,
            }
        }
    }

    /// The state a termination interrupted, if the cell holds one.
    pub fn terminated_in(&self) -> Option<TestState> {
        let raw = self.0.load(SeqCst);
        if raw & TERMINATED == 0 {
            return None;
        }
        TestState::from_u8((raw & !TERMINATED) >> FROM_SHIFT)
    }
}

fn decode(raw: u8) -> TestState {
    // only TestState discriminants are ever stored in the low bits
    TestState::from_u8(raw & STATE_MASK).unwrap_or(TestState::Done)
}

/// Capacity of the transition log.
pub const TRANSITION_LOG_CAPACITY: usize = 1024;

/// Append-only record of the states the drivers acted on, usable from both
/// contexts.
///
/// Appends are a `fetch_add` plus a store, so the renderer can log without
/// blocking. Entries past the capacity are counted but dropped.
struct TransitionLog {
    entries: [AtomicU8; TRANSITION_LOG_CAPACITY],
    len: AtomicUsize,
}

impl TransitionLog {
    fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| AtomicU8::new(TestState::Loading as u8)),
            len: AtomicUsize::new(0),
        }
    }

    fn push(&self, state: TestState) {
        let idx = self.len.fetch_add(1, SeqCst);
        if let Some(slot) = self.entries.get(idx) {
            slot.store(state as u8, SeqCst);
        }
    }

    fn clear(&self) {
        self.len.store(0, SeqCst);
    }

    /// Snapshot of the log. Only consistent once both drivers have stopped.
    fn snapshot(&self) -> Vec<TestState> {
        let len = self.len.load(SeqCst).min(TRANSITION_LOG_CAPACITY);
        self.entries[..len]
            .iter()
            .filter_map(|e| TestState::from_u8(e.load(SeqCst)))
            .collect()
    }

    fn dropped(&self) -> usize {
        self.len.load(SeqCst).saturating_sub(TRANSITION_LOG_CAPACITY)
    }
}

/// Everything the two contexts share for one probe run.
///
/// Passed explicitly (usually behind an `Arc`) so concurrent runs never share
/// a lock or a state cell.
pub struct ProbeContext<C: MonotonicClock = SystemClock> {
    lock: SpinLock,
    state: SharedState,
    /// Set by the controller once it has released the lock in this cycle.
    released: AtomicBool,
    /// Cycles started, counted by the controller.
    runs: AtomicU32,
    /// Set by whichever side hit a failed assertion.
    failed: AtomicBool,
    start_ns: AtomicU64,
    elapsed_ns: AtomicU64,
    has_elapsed: AtomicBool,
    log: TransitionLog,
    config: ProbeConfig,
    clock: C,
}

impl ProbeContext<SystemClock> {
    /// Context timed by the system monotonic clock.
    pub fn new(config: ProbeConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: MonotonicClock> ProbeContext<C> {
    pub fn with_clock(config: ProbeConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            lock: SpinLock::new(),
            state: SharedState::new(TestState::Loading),
            released: AtomicBool::new(false),
            runs: AtomicU32::new(0),
            failed: AtomicBool::new(false),
            start_ns: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            has_elapsed: AtomicBool::new(false),
            log: TransitionLog::new(),
            config,
            clock,
        })
    }

    /// Prepares a run. Must be called before either driver is invoked.
    ///
    /// Initialises the lock, checks that a zero-timeout spin takes a free lock
    /// and keeps it held for the controller, then stores `Loading` and
    /// starts the run timer.
    pub fn start(&self) -> Result<()> {
        self.lock.init();
        let acquired = self
            .lock
            .busy_spin_wait_acquire_with(&self.clock, Duration::ZERO);
        if !acquired {
            return Err(ProbeError::AssertionFailed {
                state: TestState::Loading,
                operation: "busy_spin_wait_acquire(0)",
                expected: true,
                actual: false,
            });
        }

        self.released.store(false, SeqCst);
        self.runs.store(0, SeqCst);
        self.failed.store(false, SeqCst);
        self.has_elapsed.store(false, SeqCst);
        self.log.clear();

        self.state.store(TestState::Loading);
        self.log.push(TestState::Loading);
        self.start_ns.store(nanos(self.clock.now()), SeqCst);
        info!(cycles = self.config.cycles, "probe run started");
        Ok(())
    }

    /// One renderer invocation. Never blocks; the longest it runs is the
    /// spin timeouts of `WaitAcquireFail` plus `WaitAcquire`.
    pub fn render_quantum(&self) -> Result<Flow> {
        context::ensure(ExecutionContext::Renderer)?;

        let state = self.state.load();
        trace!(%state, "renderer invoked");
        match state {
            TestState::Loading => {
                // Loading is recorded by start()
                debug!("renderer ready");
                self.advance(TestState::Loading, TestState::NotStarted);
                Ok(Flow::Continue)
            }
            TestState::NotStarted => {
                trace!("renderer waiting for controller");
                Ok(Flow::Continue)
            }
            TestState::TryAcquire => {
                self.log.push(state);
                // the controller has held the lock since start
                let acquired = self.lock.try_acquire();
                debug!(%state, result = acquired, expected = false, "try_acquire");
                self.check_result(state, "try_acquire", false, acquired)?;
                Ok(self.advance_or_stop(state, TestState::WaitAcquireFail))
            }
            TestState::WaitAcquireFail => {
                self.log.push(state);
                let timeout = self.config.wait_fail_timeout;
                debug!(%state, timeout_ms = millis(timeout), "spinning, lock stays held");
                let acquired = self
                    .lock
                    .busy_spin_wait_acquire_with(&self.clock, timeout);
                debug!(%state, result = acquired, expected = false, "busy_spin_wait_acquire");
                if self.is_terminated() {
                    return Ok(Flow::Stop);
                }
                self.check_result(state, "busy_spin_wait_acquire", false, acquired)?;
                if !self.advance(state, TestState::WaitAcquire) {
                    return Ok(Flow::Stop);
                }
                // Start the next spin in this same invocation so it is already
                // running when the controller releases.
                self.wait_acquire()
            }
            TestState::WaitAcquire => self.wait_acquire(),
            TestState::Release => self.release_and_confirm(),
            TestState::Done => {
                debug!("renderer done");
                Ok(Flow::Stop)
            }
        }
    }

    fn wait_acquire(&self) -> Result<Flow> {
        let state = TestState::WaitAcquire;
        self.log.push(state);
        let timeout = self.config.wait_acquire_timeout;
        debug!(%state, timeout_ms = millis(timeout), "spinning for release");
        let acquired = self
            .lock
            .busy_spin_wait_acquire_with(&self.clock, timeout);
        debug!(%state, result = acquired, expected = true, "busy_spin_wait_acquire");
        if self.is_terminated() {
            return Ok(Flow::Stop);
        }
        if !acquired {
            // give up: a timeout here ends the run
            error!(%state, timeout_ms = millis(timeout), "lock was never released");
            self.abort();
            return Err(ProbeError::WaitAcquireTimedOut {
                timeout_ms: millis(timeout),
            });
        }
        Ok(self.advance_or_stop(state, TestState::Release))
    }

    fn release_and_confirm(&self) -> Result<Flow> {
        let state = TestState::Release;
        self.log.push(state);
        debug!(%state, "renderer releasing");
        self.lock.release();
        let acquired = self.lock.try_acquire();
        debug!(%state, result = acquired, expected = true, "try_acquire");
        self.check_result(state, "try_acquire", true, acquired)?;

        if self.runs.load(SeqCst) < self.config.cycles {
            // hand the lock back for the controller's next cycle
            self.lock.release();
            Ok(self.advance_or_stop(state, TestState::NotStarted))
        } else {
            Ok(self.advance_or_stop(state, TestState::Done))
        }
    }

    /// One controller tick. May be called from a context that blocks.
    pub fn controller_tick(&self) -> Result<Flow> {
        context::ensure(ExecutionContext::Controller)?;

        let state = self.state.load();
        match state {
            TestState::Loading => {
                debug!("controller waiting for renderer to load");
                Ok(Flow::Continue)
            }
            TestState::NotStarted => {
                self.log.push(state);
                let cycle = self.runs.fetch_add(1, SeqCst) + 1;
                if cycle > 1 {
                    // the renderer handed the lock back at the end of Release
                    let acquired = self.lock.try_acquire();
                    self.check_result(state, "try_acquire", true, acquired)?;
                }
                self.released.store(false, SeqCst);
                info!(cycle, "starting cycle");
                self.advance(state, TestState::TryAcquire);
                Ok(Flow::Continue)
            }
            TestState::TryAcquire | TestState::WaitAcquireFail | TestState::Release => {
                trace!(%state, "controller waiting for renderer");
                Ok(Flow::Continue)
            }
            TestState::WaitAcquire => {
                if !self.released.load(SeqCst) {
                    debug!(%state, "controller releasing lock");
                    self.lock.release();
                    self.released.store(true, SeqCst);
                } else {
                    trace!(%state, "controller already released");
                }
                Ok(Flow::Continue)
            }
            TestState::Done => self.finish().map(|_| Flow::Stop),
        }
    }

    fn finish(&self) -> Result<()> {
        let elapsed = self.clock.now().saturating_sub(self.started_at());
        self.elapsed_ns.store(nanos(elapsed), SeqCst);
        self.has_elapsed.store(true, SeqCst);

        if let Some(state) = self.terminated_in() {
            warn!(%state, elapsed_ms = millis(elapsed), "run terminated");
            return Err(ProbeError::Terminated { state });
        }
        if self.failed.load(SeqCst) {
            warn!(elapsed_ms = millis(elapsed), "run failed");
            return Ok(());
        }

        let minimum = self.config.wait_fail_timeout;
        info!(
            elapsed_ms = millis(elapsed),
            expected_more_than_ms = millis(minimum),
            "run done"
        );
        if elapsed <= minimum {
            self.abort();
            return Err(ProbeError::RunTooShort {
                elapsed_ms: millis(elapsed),
                minimum_ms: millis(minimum),
            });
        }
        Ok(())
    }

    /// Force-ends the run by storing `Done`.
    ///
    /// Returns false if the run had already finished. A spin in progress is
    /// not interrupted; both drivers stop at their next look at the state.
    pub fn terminate(&self) -> bool {
        match self.state.force_done(true) {
            Some(previous) => {
                warn!(state = %previous, "terminating run");
                true
            }
            None => false,
        }
    }

    fn advance(&self, from: TestState, to: TestState) -> bool {
        let moved = self.state.advance(from, to);
        if !moved {
            debug!(%from, %to, "transition skipped, run was ended");
        }
        moved
    }

    fn advance_or_stop(&self, from: TestState, to: TestState) -> Flow {
        if self.advance(from, to) && to != TestState::Done {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    fn check_result(
        &self,
        state: TestState,
        operation: &'static str,
        expected: bool,
        actual: bool,
    ) -> Result<()> {
        if expected == actual {
            return Ok(());
        }
        error!(%state, operation, expected, actual, "lock assertion failed");
        self.abort();
        Err(ProbeError::AssertionFailed {
            state,
            operation,
            expected,
            actual,
        })
    }

    pub(crate) fn abort(&self) {
        self.failed.store(true, SeqCst);
        self.state.force_done(false);
    }

    pub fn state(&self) -> TestState {
        self.state.load()
    }

    pub fn lock(&self) -> &SpinLock {
        &self.lock
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Whether the controller has released the lock in the current cycle.
    pub fn released(&self) -> bool {
        self.released.load(SeqCst)
    }

    /// Cycles the controller has started.
    pub fn runs(&self) -> u32 {
        self.runs.load(SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated_in().is_some()
    }

    /// The state the run was in when [`terminate`](Self::terminate) hit it.
    pub fn terminated_in(&self) -> Option<TestState> {
        self.state.terminated_in()
    }

    /// Run duration as recorded by the controller at `Done`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.has_elapsed
            .load(SeqCst)
            .then(|| Duration::from_nanos(self.elapsed_ns.load(SeqCst)))
    }

    /// Every state acted on so far, in order, ending in `Done` once the run
    /// has finished.
    pub fn transitions(&self) -> Vec<TestState> {
        let mut states = self.log.snapshot();
        if self.state() == TestState::Done {
            states.push(TestState::Done);
        }
        states
    }

    fn started_at(&self) -> Duration {
        Duration::from_nanos(self.start_ns.load(SeqCst))
    }

    /// Builds the report for a run whose drivers have both stopped.
    pub fn report(&self, outcome: Result<()>) -> RunReport {
        let outcome = match self.terminated_in() {
            Some(state) => Err(ProbeError::Terminated { state }),
            None => outcome,
        };
        let started = self.runs();
        let completed = if outcome.is_ok() {
            started
        } else {
            started.saturating_sub(1)
        };
        if self.log.dropped() > 0 {
            warn!(dropped = self.log.dropped(), "transition log overflowed");
        }
        RunReport {
            cycles_started: started,
            cycles_completed: completed,
            elapsed: self.elapsed(),
            transitions: self.transitions(),
            outcome,
        }
    }
}

impl<C: MonotonicClock> fmt::Debug for ProbeContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeContext")
            .field("state", &self.state())
            .field("lock", &self.lock)
            .field("released", &self.released())
            .field("runs", &self.runs())
            .field("failed", &self.is_failed())
            .finish_non_exhaustive()
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
