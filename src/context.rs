//! Execution-context markers.
//!
//! The probe runs two drivers in two very different places: a renderer context
//! that must never perform a blocking wait, and a controller context that may
//! sleep freely. The host marks each thread with the role it plays so drivers
//! can assert they are being called from the right side.
//!
//! The marker is advisory. Nothing here can stop code from blocking; it only
//! lets the drivers catch a miswired host early.

use std::cell::Cell;
use std::fmt;

use crate::error::{ProbeError, Result};

/// The role a thread plays in a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Real-time side: no blocking waits, only spinning.
    Renderer,
    /// Periodic side: free to sleep or block.
    Controller,
}

impl ExecutionContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionContext::Renderer => "renderer",
            ExecutionContext::Controller => "controller",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

thread_local! {
    static CURRENT: Cell<Option<ExecutionContext>> = const { Cell::new(None) };
}

/// The context the current thread has entered, if any.
pub fn current() -> Option<ExecutionContext> {
    CURRENT.with(Cell::get)
}

/// Marks the current thread as running in `ctx` until the guard is dropped.
///
/// Guards nest: dropping restores whatever was current before.
///
/// ```
/// use axiom_lockprobe::context::{self, ExecutionContext};
///
/// assert_eq!(context::current(), None);
/// {
///     let _guard = context::enter(ExecutionContext::Renderer);
///     assert_eq!(context::current(), Some(ExecutionContext::Renderer));
/// }
/// assert_eq!(context::current(), None);
/// ```
pub fn enter(ctx: ExecutionContext) -> ContextGuard {
    let previous = CURRENT.with(|c| c.replace(Some(ctx)));
    ContextGuard { previous }
}

/// Restores the previous context marker on drop.
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<ExecutionContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        CURRENT.with(|c| c.set(previous));
    }
}

/// Fails if the thread is explicitly marked as a context other than
/// `expected`.
///
/// Unmarked threads (tests driving the state machine by hand) are accepted
/// as any context.
pub(crate) fn ensure(expected: ExecutionContext) -> Result<()> {
    match current() {
        Some(actual) if actual != expected => Err(ProbeError::WrongContext {
            driver: expected,
            actual,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_restore() {
        assert_eq!(current(), None);
        let outer = enter(ExecutionContext::Controller);
        {
            let _inner = enter(ExecutionContext::Renderer);
            assert_eq!(current(), Some(ExecutionContext::Renderer));
            assert!(ensure(ExecutionContext::Controller).is_err());
        }
        assert_eq!(current(), Some(ExecutionContext::Controller));
        drop(outer);
        assert_eq!(current(), None);
    }

    #[test]
    fn marker_is_per_thread() {
        let _guard = enter(ExecutionContext::Renderer);
        let other = std::thread::spawn(current).join().unwrap();
        assert_eq!(other, None);
    }

    #[test]
    fn unmarked_thread_passes_either_check() {
        assert!(ensure(ExecutionContext::Renderer).is_ok());
        assert!(ensure(ExecutionContext::Controller).is_ok());
    }
}
