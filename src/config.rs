//! Probe run configuration.

use std::time::Duration;

use crate::error::{ProbeError, Result};

/// One render quantum: 128 frames at 48 kHz.
pub const DEFAULT_RENDER_QUANTUM: Duration = Duration::from_nanos(2_666_667);

/// Timing and repetition knobs for a probe run.
///
/// The defaults reproduce the reference run: a 100ms spin that must fail, a
/// 1000ms spin that must succeed, a 10ms controller tick, one cycle.
///
/// ```
/// use std::time::Duration;
/// use axiom_lockprobe::ProbeConfig;
///
/// let config = ProbeConfig::default()
///     .with_cycles(3)
///     .with_controller_period(Duration::from_millis(5));
/// assert!(config.validate().is_ok());
/// assert_eq!(config.cycles, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Spin timeout in `WaitAcquireFail`; the lock stays held throughout.
    pub wait_fail_timeout: Duration,
    /// Spin timeout in `WaitAcquire`; the controller releases during it.
    pub wait_acquire_timeout: Duration,
    /// Period between controller driver invocations.
    pub controller_period: Duration,
    /// Period between renderer driver invocations. Zero means back to back.
    pub render_quantum: Duration,
    /// Number of full sequences; more than one loops `Release -> NotStarted`.
    pub cycles: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            wait_fail_timeout: Duration::from_millis(100),
            wait_acquire_timeout: Duration::from_millis(1000),
            controller_period: Duration::from_millis(10),
            render_quantum: DEFAULT_RENDER_QUANTUM,
            cycles: 1,
        }
    }
}

impl ProbeConfig {
    pub fn with_wait_fail_timeout(mut self, timeout: Duration) -> Self {
        self.wait_fail_timeout = timeout;
        self
    }

    pub fn with_wait_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.wait_acquire_timeout = timeout;
        self
    }

    pub fn with_controller_period(mut self, period: Duration) -> Self {
        self.controller_period = period;
        self
    }

    pub fn with_render_quantum(mut self, quantum: Duration) -> Self {
        self.render_quantum = quantum;
        self
    }

    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    /// Rejects configurations under which the protocol cannot succeed.
    pub fn validate(&self) -> Result<()> {
        if self.cycles == 0 {
            return Err(invalid("cycles must be at least 1"));
        }
        if self.controller_period.is_zero() {
            return Err(invalid("controller period must be non-zero"));
        }
        // the controller needs at least one tick to release during the spin
        if self.wait_acquire_timeout <= self.controller_period {
            return Err(invalid("wait-acquire timeout must exceed the controller period"));
        }
        if self.wait_acquire_timeout <= self.wait_fail_timeout {
            return Err(invalid("wait-acquire timeout must exceed the wait-fail timeout"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ProbeError {
    ProbeError::InvalidConfig {
        reason: reason.to_string(),
    }
}
