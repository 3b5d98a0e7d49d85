//! Outcome of a finished probe run.

use std::fmt;
use std::time::Duration;

use crate::error::{ProbeError, Result};
use crate::sequencer::TestState;

/// What a probe run did and whether every lock assertion held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Cycles the controller started.
    pub cycles_started: u32,
    /// Cycles that reached the end of `Release` cleanly.
    pub cycles_completed: u32,
    /// Duration from start to `Done`, if the controller got to measure it.
    pub elapsed: Option<Duration>,
    /// Every state acted on, in order, ending in `Done`.
    pub transitions: Vec<TestState>,
    /// The first fatal error, if any.
    pub outcome: Result<()>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ProbeError> {
        self.outcome.as_ref().err()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(()) => write!(f, "PASS")?,
            Err(e) => write!(f, "FAIL ({e})")?,
        }
        write!(f, ": {}/{} cycles", self.cycles_completed, self.cycles_started)?;
        if let Some(elapsed) = self.elapsed {
            write!(f, " in {}ms", elapsed.as_millis())?;
        }
        Ok(())
    }
}
