//! Iteration callbacks for the Newton solve.
//!
//! A monitor sees every iteration before its linear solve and may stop the
//! run there. Stopping is the only way to interrupt a solve.
//!
//! # Example
//!
//! ```
//! use penner::optimize::{IterationMonitor, MonitorAction};
//!
//! let monitor = IterationMonitor::new(|report| {
//!     println!("[{}] |F| = {:.3e}", report.iteration, report.error);
//!     if report.iteration >= 10 {
//!         MonitorAction::Stop
//!     } else {
//!         MonitorAction::Continue
//!     }
//! });
//! ```

use crate::metric::ConstraintMode;

/// Whether to keep iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Run the next iteration.
    Continue,
    /// End the solve as interrupted.
    Stop,
}

/// State of the solve at an iteration boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// Iterations completed so far.
    pub iteration: usize,
    /// Constraint set being solved.
    pub mode: ConstraintMode,
    /// Residual norm of the current iterate.
    pub error: f64,
    /// Step taken by the previous iteration.
    pub lambda: f64,
    /// Number of constraint rows.
    pub num_constraints: usize,
}

/// A callback invoked once per Newton iteration.
pub struct IterationMonitor {
    callback: Box<dyn Fn(&IterationReport) -> MonitorAction + Send + Sync>,
}

impl IterationMonitor {
    /// Create a monitor from a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&IterationReport) -> MonitorAction + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Stop after `iterations` iterations in any mode.
    pub fn stop_after(iterations: usize) -> Self {
        Self::new(move |report| {
            if report.iteration >= iterations {
                MonitorAction::Stop
            } else {
                MonitorAction::Continue
            }
        })
    }

    /// Pass a report to the callback.
    #[inline]
    pub fn report(&self, report: &IterationReport) -> MonitorAction {
        (self.callback)(report)
    }

    /// A monitor that never stops the solve.
    pub fn none() -> Self {
        Self::new(|_| MonitorAction::Continue)
    }
}

impl Default for IterationMonitor {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for IterationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationMonitor").finish_non_exhaustive()
    }
}
