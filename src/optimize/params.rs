//! Newton solver parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Parameters for the constrained Newton solve.
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use penner::optimize::NewtonParameters;
///
/// let params: NewtonParameters = serde_json::from_str(r#"{"max_itr": 50, "solver": "cg"}"#).unwrap();
/// assert_eq!(params.max_itr, 50);
/// assert_eq!(params.lambda0, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonParameters {
    /// Cap the step size and backtrack while the residual grows.
    pub do_reduction: bool,
    /// Linear solver back end: `ldlt`, `cholesky`, `dense` or `cg`.
    pub solver: String,
    /// Start every line search at `lambda0` instead of twice the last step.
    pub reset_lambda: bool,
    /// Initial line search step.
    pub lambda0: f64,
    /// Maximum Newton iterations.
    pub max_itr: usize,
    /// Smallest step for residual backtracking.
    pub bound_norm_thres: f64,
    /// Write a checkpoint every this many iterations; zero or less disables.
    pub checkpoint_frequency: i64,
    /// Directory for checkpoints and iteration logs.
    pub output_dir: Option<PathBuf>,
    /// Residual norm at which the solve has converged.
    pub error_eps: f64,
}

impl Default for NewtonParameters {
    fn default() -> Self {
        Self {
            do_reduction: false,
            solver: "ldlt".to_string(),
            reset_lambda: false,
            lambda0: 1.0,
            max_itr: 1000,
            bound_norm_thres: 1e-10,
            checkpoint_frequency: 0,
            output_dir: None,
            error_eps: 1e-10,
        }
    }
}

impl NewtonParameters {
    /// Set the linear solver back end by name.
    pub fn with_solver(mut self, solver: impl Into<String>) -> Self {
        self.solver = solver.into();
        self
    }

    /// Set the iteration limit.
    pub fn with_max_itr(mut self, max_itr: usize) -> Self {
        self.max_itr = max_itr;
        self
    }

    /// Set the convergence threshold.
    pub fn with_error_eps(mut self, error_eps: f64) -> Self {
        self.error_eps = error_eps;
        self
    }

    /// Set the initial line search step.
    pub fn with_lambda0(mut self, lambda0: f64) -> Self {
        self.lambda0 = lambda0;
        self
    }

    /// Enable or disable step reduction.
    pub fn with_reduction(mut self, enabled: bool) -> Self {
        self.do_reduction = enabled;
        self
    }

    /// Enable or disable resetting the step each iteration.
    pub fn with_reset_lambda(mut self, enabled: bool) -> Self {
        self.reset_lambda = enabled;
        self
    }

    /// Write checkpoints every `frequency` iterations into `output_dir`.
    pub fn with_checkpoints(mut self, frequency: i64, output_dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_frequency = frequency;
        self.output_dir = Some(output_dir.into());
        self
    }

    /// Set the output directory for iteration logs.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    /// The checkpoint period, if checkpoints are enabled.
    pub fn checkpoint_period(&self) -> Option<usize> {
        usize::try_from(self.checkpoint_frequency).ok().filter(|k| *k > 0)
    }
}
