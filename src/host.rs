//! Thread-backed host for a probe run.
//!
//! The sequencer never spawns threads or sleeps on its own. This module plays
//! the part of the environment around it: one thread invokes the renderer
//! driver once per render quantum, another invokes the controller driver on a
//! fixed period, and each keeps going until its driver says [`Flow::Stop`].
//!
//! Only the host loop sleeps between invocations. The renderer driver itself
//! never does.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::clock::{MonotonicClock, SystemClock};
use crate::config::ProbeConfig;
use crate::context::{self, ExecutionContext};
use crate::error::{ProbeError, Result};
use crate::report::RunReport;
use crate::sequencer::{Flow, ProbeContext, TestState};

/// Invokes `driver` every `period` until it returns [`Flow::Stop`] or an error.
///
/// Invocations are scheduled against absolute deadlines so a slow invocation
/// does not push every later one back. A zero period runs back to back.
///
/// ```
/// use std::time::Duration;
/// use axiom_lockprobe::{host::run_repeating, Flow};
///
/// let mut calls = 0;
/// run_repeating(Duration::from_millis(1), || {
///     calls += 1;
///     Ok(if calls == 3 { Flow::Stop } else { Flow::Continue })
/// })
/// .unwrap();
/// assert_eq!(calls, 3);
/// ```
pub fn run_repeating<F>(period: Duration, mut driver: F) -> Result<()>
where
    F: FnMut() -> Result<Flow>,
{
    let mut next = Instant::now();
    loop {
        if driver()? == Flow::Stop {
            return Ok(());
        }
        if period.is_zero() {
            std::hint::spin_loop();
            continue;
        }
        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // overran: resynchronise instead of bursting to catch up
            next = now;
        }
    }
}

/// Ends the run if a driver thread unwinds, so the other side stops too.
struct AbortOnPanic<C: MonotonicClock>(Arc<ProbeContext<C>>);

impl<C: MonotonicClock> Drop for AbortOnPanic<C> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

fn spawn_driver<C>(
    ctx: Arc<ProbeContext<C>>,
    role: ExecutionContext,
) -> Result<JoinHandle<Result<()>>>
where
    C: MonotonicClock + 'static,
{
    let period = match role {
        ExecutionContext::Renderer => ctx.config().render_quantum,
        ExecutionContext::Controller => ctx.config().controller_period,
    };
    thread::Builder::new()
        .name(format!("lockprobe-{role}"))
        .spawn(move || {
            let _marker = context::enter(role);
            let _abort = AbortOnPanic(ctx.clone());
            debug!(%role, ?period, "driver thread started");
            let result = run_repeating(period, || match role {
                ExecutionContext::Renderer => ctx.render_quantum(),
                ExecutionContext::Controller => ctx.controller_tick(),
            });
            debug!(%role, ok = result.is_ok(), "driver thread stopped");
            result
        })
        .map_err(|e| ProbeError::SpawnThread {
            role,
            message: e.to_string(),
        })
}

fn join_driver(role: ExecutionContext, handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .join()
        .unwrap_or(Err(ProbeError::HostPanicked { role }))
}

/// A run in progress on its two host threads.
pub struct RunHandle<C: MonotonicClock + 'static = SystemClock> {
    ctx: Arc<ProbeContext<C>>,
    renderer: JoinHandle<Result<()>>,
    controller: JoinHandle<Result<()>>,
}

impl<C: MonotonicClock + 'static> RunHandle<C> {
    /// Starts `ctx` and spawns both driver threads.
    pub fn launch(ctx: Arc<ProbeContext<C>>) -> Result<Self> {
        ctx.start()?;
        let renderer = spawn_driver(ctx.clone(), ExecutionContext::Renderer)?;
        let controller = match spawn_driver(ctx.clone(), ExecutionContext::Controller) {
            Ok(handle) => handle,
            Err(e) => {
                ctx.terminate();
                let _ = join_driver(ExecutionContext::Renderer, renderer);
                return Err(e);
            }
        };
        Ok(Self {
            ctx,
            renderer,
            controller,
        })
    }

    pub fn context(&self) -> &Arc<ProbeContext<C>> {
        &self.ctx
    }

    /// Force-terminates this run. See [`ProbeContext::terminate`].
    pub fn terminate(&self) -> bool {
        self.ctx.terminate()
    }

    /// Waits for both drivers to stop and reports the run.
    pub fn join(self) -> RunReport {
        let renderer = join_driver(ExecutionContext::Renderer, self.renderer);
        let controller = join_driver(ExecutionContext::Controller, self.controller);
        let report = self.ctx.report(renderer.and(controller));
        match report.error() {
            None => info!(%report, "probe run finished"),
            Some(error) => warn!(%error, cycles = report.cycles_started, "probe run failed"),
        }
        report
    }
}

/// Runs one probe to completion on the system clock.
pub fn run_probe(config: ProbeConfig) -> Result<RunReport> {
    let ctx = Arc::new(ProbeContext::new(config)?);
    Ok(RunHandle::launch(ctx)?.join())
}

/// Entry points for starting and stopping runs from outside.
///
/// At most one run is active per harness. Concurrent harnesses are fully
/// independent, each run owning its own [`ProbeContext`].
pub struct Harness<C: MonotonicClock + Clone + 'static = SystemClock> {
    config: ProbeConfig,
    clock: C,
    active: Mutex<Option<Arc<ProbeContext<C>>>>,
}

impl Harness<SystemClock> {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: MonotonicClock + Clone + 'static> Harness<C> {
    pub fn with_clock(config: ProbeConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            active: Mutex::new(None),
        })
    }

    /// Begins a run, or returns `None` if one is already active.
    #[instrument(skip(self), fields(cycles = self.config.cycles))]
    pub fn begin(&self) -> Result<Option<RunHandle<C>>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|ctx| ctx.state() != TestState::Done) {
            info!("run already active, ignoring begin");
            return Ok(None);
        }

        let ctx = ProbeContext::with_clock(self.config.clone(), self.clock.clone())?;
        let ctx = Arc::new(ctx);
        let handle = RunHandle::launch(ctx.clone())?;
        *active = Some(ctx);
        Ok(Some(handle))
    }

    /// Force-terminates the active run. Returns false if nothing was running.
    #[instrument(skip(self))]
    pub fn terminate(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.as_ref().is_some_and(|ctx| ctx.terminate())
    }

    pub fn is_active(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.as_ref().is_some_and(|ctx| ctx.state() != TestState::Done)
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}
