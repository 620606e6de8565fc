//! Minimum-norm Newton iterations on the angle and holonomy constraints.
//!
//! Each step solves `J Jᵀ μ = F` and moves the coordinates by `−Jᵀ μ`, the
//! smallest change that zeroes the linearized residual. A backtracking line
//! search keeps every triangle valid.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use super::checkpoint::{Checkpoint, CHECKPOINT_VERSION};
use super::monitor::{IterationMonitor, IterationReport, MonitorAction};
use super::params::NewtonParameters;
use crate::error::{MeshError, Result};
use crate::linalg::{add_diagonal, csc_transpose_mul_vec, solver_from_name, LinearSolver};
use crate::metric::{normal_matrix, ConstraintLayout, ConstraintMode, MarkedPennerConeMetric};

/// Smallest line search step before the solve gives up.
const MIN_LAMBDA: f64 = 1e-16;
/// Validity-limited step below which a relaxed solve pins its soft boundary.
const STALL_LAMBDA: f64 = 1e-3;
/// First Tikhonov shift tried after a failed factorization, relative to the
/// largest diagonal entry.
const INITIAL_REGULARIZATION: f64 = 1e-12;
/// Growth of the Tikhonov shift between retries.
const REGULARIZATION_GROWTH: f64 = 100.0;
/// Regularized retries before the solve gives up.
const MAX_REGULARIZATION_ATTEMPTS: usize = 6;

/// How a Newton solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonStatus {
    /// The residual norm fell below `error_eps`.
    Converged,
    /// `max_itr` iterations ran without converging.
    MaxIterations,
    /// The normal equations could not be solved even with regularization.
    LinearSolveFailed,
    /// No step above the minimum kept every triangle valid, or with
    /// `do_reduction` none lowered the residual.
    LineSearchFailed,
    /// The iteration monitor stopped the solve.
    Interrupted,
}

impl NewtonStatus {
    /// Whether the solve converged.
    pub fn is_converged(self) -> bool {
        self == NewtonStatus::Converged
    }
}

/// Summary of a finished Newton solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonReport {
    /// How the solve ended.
    pub status: NewtonStatus,
    /// Iteration count, including iterations before a resume.
    pub iterations: usize,
    /// Residual norm of the kept iterate.
    pub error: f64,
    /// Residual norm when the solve started.
    pub initial_error: f64,
    /// Last line search step.
    pub lambda: f64,
    /// Constraint set that was solved.
    pub mode: ConstraintMode,
    /// Whether a stalled relaxed solve was restarted with its soft boundary
    /// vertices held at their targets.
    pub boundary_pinned: bool,
}

/// Where a solve continues from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StartPoint {
    pub iteration: usize,
    pub lambda: f64,
    pub pinned: bool,
}

/// Solve `a x = b`, retrying with a growing diagonal shift on failure.
///
/// The shift is scaled by the largest diagonal entry of `a`.
fn solve_regularized(solver: &dyn LinearSolver, a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let mut last_error = match solver.factor_and_solve(a, b) {
        Ok(x) => return Ok(x),
        Err(e) => e,
    };

    let scale = a
        .triplet_iter()
        .filter(|(i, j, _)| i == j)
        .fold(0.0f64, |m, (_, _, v)| m.max(v.abs()));
    let scale = if scale > 0.0 && scale.is_finite() { scale } else { 1.0 };

    let mut eps = INITIAL_REGULARIZATION * scale;
    for _ in 0..MAX_REGULARIZATION_ATTEMPTS {
        match solver.factor_and_solve(&add_diagonal(a, eps), b) {
            Ok(x) => {
                log::warn!("{} solve needed regularization {:e}", solver.name(), eps);
                return Ok(x);
            }
            Err(e) => last_error = e,
        }
        eps *= REGULARIZATION_GROWTH;
    }
    Err(last_error)
}

/// Per-iteration CSV log.
struct IterationLog {
    writer: BufWriter<File>,
}

impl IterationLog {
    fn create(dir: &Path, mode: ConstraintMode) -> Result<Self> {
        let path = dir.join(format!("newton_{}_log.csv", mode.name()));
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "iteration,error,lambda")?;
        Ok(Self { writer })
    }

    fn record(&mut self, iteration: usize, error: f64, lambda: f64) -> Result<()> {
        writeln!(self.writer, "{},{:e},{:e}", iteration, error, lambda)?;
        Ok(())
    }
}

/// Residuals of one iterate.
struct Evaluation {
    /// Residual of the layout steps are computed from.
    residual: DVector<f64>,
    /// Norm of `residual`.
    active_error: f64,
    /// Residual norm under the requested layout.
    error: f64,
}

/// Evaluate `coords` against `layout`, stepping with `pinned` when given.
fn evaluate(
    metric: &MarkedPennerConeMetric,
    layout: &ConstraintLayout,
    pinned: Option<&ConstraintLayout>,
    coords: &DVector<f64>,
) -> Evaluation {
    let angles = metric.corner_angles_at(coords);
    let requested = layout.residual(&angles);
    let error = requested.norm();
    let residual = match pinned {
        Some(pinned) => pinned.residual(&angles),
        None => requested,
    };
    Evaluation {
        active_error: residual.norm(),
        residual,
        error,
    }
}

/// Outcome of a backtracking line search.
struct LineSearch {
    accepted: Option<(DVector<f64>, Evaluation)>,
    lambda: f64,
    /// Triangle validity cut the step below [`STALL_LAMBDA`].
    stalled: bool,
}

fn line_search(
    metric: &MarkedPennerConeMetric,
    coords: &DVector<f64>,
    step: &DVector<f64>,
    current: &Evaluation,
    lambda: f64,
    params: &NewtonParameters,
    evaluate: impl Fn(&DVector<f64>) -> Evaluation,
) -> LineSearch {
    let mut lambda = if params.reset_lambda {
        params.lambda0
    } else {
        params.lambda0.min(2.0 * lambda)
    };
    if params.do_reduction {
        let max_change = step.amax();
        if lambda * max_change > 1.0 {
            lambda = 1.0 / max_change;
        }
    }

    let proposed = lambda;
    let mut trial = coords + lambda * step;
    while !metric.is_valid_coords(&trial) && lambda >= MIN_LAMBDA {
        lambda *= 0.5;
        trial = coords + lambda * step;
    }
    let stalled = lambda < proposed && lambda < STALL_LAMBDA;
    if lambda < MIN_LAMBDA {
        return LineSearch {
            accepted: None,
            lambda,
            stalled,
        };
    }

    let mut evaluation = evaluate(&trial);
    if params.do_reduction {
        // the previous iterate stays unless a step strictly lowers the residual
        while evaluation.active_error.is_nan() || evaluation.active_error >= current.active_error {
            lambda *= 0.5;
            if lambda <= params.bound_norm_thres {
                return LineSearch {
                    accepted: None,
                    lambda,
                    stalled,
                };
            }
            trial = coords + lambda * step;
            if metric.is_valid_coords(&trial) {
                evaluation = evaluate(&trial);
            }
        }
    }
    LineSearch {
        accepted: Some((trial, evaluation)),
        lambda,
        stalled,
    }
}

/// Run Newton iterations on `metric` until convergence or failure.
///
/// The metric ends at the iterate with the smallest residual. Only I/O and
/// configuration problems are errors; numerical failures are reported
/// through [`NewtonReport::status`].
///
/// A relaxed solve whose linear solve fails, or whose step is cut below
/// [`STALL_LAMBDA`] to keep triangles valid, restarts once from its starting
/// coordinates with the soft boundary vertices pinned to their targets.
/// Errors are always measured against `layout`.
pub(crate) fn newton_solve(
    metric: &mut MarkedPennerConeMetric,
    layout: &ConstraintLayout,
    params: &NewtonParameters,
    monitor: Option<&IterationMonitor>,
    start: Option<StartPoint>,
) -> Result<NewtonReport> {
    let solver = solver_from_name(&params.solver)?;
    if params.lambda0.is_nan() || params.lambda0 <= 0.0 {
        return Err(MeshError::invalid_param("lambda0", params.lambda0, "must be positive"));
    }
    let mode = layout.mode();
    let checkpoint_period = params.checkpoint_period();
    if checkpoint_period.is_some() && params.output_dir.is_none() {
        log::warn!("checkpoint_frequency is set without output_dir; checkpoints are disabled");
    }
    let mut iteration_log = match &params.output_dir {
        Some(dir) => Some(IterationLog::create(dir, mode)?),
        None => None,
    };
    let fingerprint = layout.fingerprint(metric);
    let pinned_layout = layout.pin_soft_boundary(metric);

    let start_coords = metric.coords().clone();
    let mut coords = start_coords.clone();
    let (mut iteration, mut lambda, mut is_pinned) = match start {
        Some(point) => (point.iteration, point.lambda, point.pinned && pinned_layout.is_some()),
        None => (0, params.lambda0, false),
    };
    let active_pin = |pinned: bool| if pinned { pinned_layout.as_ref() } else { None };
    let mut current = evaluate(metric, layout, active_pin(is_pinned), &coords);
    let initial_error = current.error;
    let mut best_error = current.error;
    let mut best_coords = coords.clone();

    log::info!(
        "{} newton solve: {} constraints, {} coordinates, initial error {:e}",
        mode,
        layout.num_constraints(),
        coords.len(),
        current.error
    );

    let status = loop {
        if let Some(log) = iteration_log.as_mut() {
            log.record(iteration, current.error, lambda)?;
        }
        if current.error < params.error_eps {
            break NewtonStatus::Converged;
        }
        if iteration >= params.max_itr {
            break NewtonStatus::MaxIterations;
        }
        if let Some(monitor) = monitor {
            let report = IterationReport {
                iteration,
                mode,
                error: current.error,
                lambda,
                num_constraints: layout.num_constraints(),
            };
            if monitor.report(&report) == MonitorAction::Stop {
                log::info!("{} newton solve interrupted at iteration {}", mode, iteration);
                break NewtonStatus::Interrupted;
            }
        }

        let pin = active_pin(is_pinned);
        let active = pin.unwrap_or(layout);
        let angles = metric.corner_angles_at(&coords);
        let jacobian = active.jacobian(metric, &angles);
        let search = match solve_regularized(solver.as_ref(), &normal_matrix(&jacobian), &current.residual) {
            Ok(mu) => {
                let step = -csc_transpose_mul_vec(&jacobian, &mu);
                Some(line_search(metric, &coords, &step, &current, lambda, params, |c| {
                    evaluate(metric, layout, pin, c)
                }))
            }
            Err(e) => {
                log::warn!("newton step failed at iteration {}: {}", iteration, e);
                None
            }
        };

        let stalled = search.as_ref().map_or(true, |s| s.stalled);
        if stalled && !is_pinned && pinned_layout.is_some() {
            log::warn!(
                "{} newton solve stalled at iteration {}; restarting with {} soft boundary vertices pinned",
                mode,
                iteration,
                layout.soft_boundary().len()
            );
            is_pinned = true;
            coords.copy_from(&start_coords);
            lambda = params.lambda0;
            current = evaluate(metric, layout, active_pin(true), &coords);
            continue;
        }
        let Some(search) = search else {
            break NewtonStatus::LinearSolveFailed;
        };
        lambda = search.lambda;
        let Some((trial, evaluation)) = search.accepted else {
            log::warn!("line search failed at iteration {}", iteration);
            break NewtonStatus::LineSearchFailed;
        };

        coords = trial;
        current = evaluation;
        iteration += 1;
        if current.error < best_error {
            best_error = current.error;
            best_coords.copy_from(&coords);
        }
        log::debug!(
            "[{}] {} iteration {}: error {:e}, lambda {:e}",
            params.solver,
            mode,
            iteration,
            current.error,
            lambda
        );

        if let (Some(period), Some(dir)) = (checkpoint_period, &params.output_dir) {
            if iteration % period == 0 {
                let checkpoint = Checkpoint {
                    version: CHECKPOINT_VERSION,
                    mode,
                    iteration,
                    lambda,
                    error: current.error,
                    coords: coords.iter().copied().collect(),
                    fingerprint: fingerprint.clone(),
                    pinned: is_pinned,
                };
                checkpoint.save(&Checkpoint::path_in(dir, mode))?;
            }
        }
    };

    metric.set_coords(best_coords)?;
    log::info!(
        "{} newton solve finished: {:?} after {} iterations, error {:e}",
        mode,
        status,
        iteration,
        best_error
    );
    Ok(NewtonReport {
        status,
        iterations: iteration,
        error: best_error,
        initial_error,
        lambda,
        mode,
        boundary_pinned: is_pinned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{symmetric_from_triplets, LdltSolver};
    use crate::mesh::{build_from_triangles, shapes};
    use crate::metric::MarkedMetricParameters;
    use nalgebra::Point3;
    use std::f64::consts::PI;
    use std::sync::{Arc, Mutex};

    /// A grid lifted into a bump, with flat interior targets.
    fn bumpy_grid() -> MarkedPennerConeMetric {
        let (mut vertices, faces) = shapes::grid(5, 5, 1.0, 1.0);
        for p in vertices.iter_mut() {
            let r2 = (p.x - 0.5).powi(2) + (p.y - 0.5).powi(2);
            *p = Point3::new(p.x, p.y, 0.3 * (-8.0 * r2).exp());
        }
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        MarkedPennerConeMetric::new(mesh, 1.0, false)
    }

    #[test]
    fn test_regularization_rescues_singular_system() {
        // rank one
        let a = symmetric_from_triplets(2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let x = solve_regularized(&LdltSolver, &a, &b).unwrap();
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_regularization_scales_with_diagonal() {
        let big = 1e14;
        let a = symmetric_from_triplets(2, &[(0, 0, big), (0, 1, big), (1, 0, big), (1, 1, big)]);
        let b = DVector::from_vec(vec![big, big]);
        let x = solve_regularized(&LdltSolver, &a, &b).unwrap();
        assert!(x.iter().all(|v| v.is_finite()));
        assert!((x[0] + x[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reduction_never_raises_error() {
        let mut metric = bumpy_grid();
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        let newton = NewtonParameters::default().with_lambda0(4.0).with_reduction(true);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        let monitor = IterationMonitor::new(move |report| {
            seen.lock().unwrap().push(report.error);
            MonitorAction::Continue
        });

        let report = newton_solve(&mut metric, &layout, &newton, Some(&monitor), None).unwrap();
        assert!(report.status.is_converged());
        let errors = errors.lock().unwrap();
        assert!(errors.len() > 1);
        for pair in errors.windows(2) {
            assert!(pair[1] <= pair[0], "error rose from {:e} to {:e}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_flattens_interior_of_bump() {
        let mut metric = bumpy_grid();
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        assert!(metric.max_interior_angle_error() > 1e-3);

        let report = newton_solve(&mut metric, &layout, &NewtonParameters::default(), None, None).unwrap();
        assert_eq!(report.status, NewtonStatus::Converged);
        assert!(report.error < 1e-10);
        assert!(report.initial_error > report.error);
        assert!(metric.max_interior_angle_error() < 1e-8);
    }

    #[test]
    fn test_monitor_interrupts() {
        let mut metric = bumpy_grid();
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        let monitor = IterationMonitor::stop_after(1);

        let report = newton_solve(&mut metric, &layout, &NewtonParameters::default(), Some(&monitor), None).unwrap();
        assert_eq!(report.status, NewtonStatus::Interrupted);
        assert_eq!(report.iterations, 1);
        assert!(report.error <= report.initial_error);
    }

    #[test]
    fn test_max_iterations() {
        let mut metric = bumpy_grid();
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        let newton = NewtonParameters::default().with_max_itr(0);

        let report = newton_solve(&mut metric, &layout, &newton, None, None).unwrap();
        assert_eq!(report.status, NewtonStatus::MaxIterations);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_unknown_solver_is_an_error() {
        let mut metric = bumpy_grid();
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &MarkedMetricParameters::default());
        let newton = NewtonParameters::default().with_solver("qr");
        assert!(matches!(
            newton_solve(&mut metric, &layout, &newton, None, None),
            Err(MeshError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_every_backend_converges() {
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        for solver in crate::linalg::SOLVER_NAMES {
            let mut metric = bumpy_grid();
            let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
            let newton = NewtonParameters::default().with_solver(solver).with_error_eps(1e-9);
            let report = newton_solve(&mut metric, &layout, &newton, None, None).unwrap();
            assert!(report.status.is_converged(), "{} did not converge", solver);

            let sums = metric.vertex_angle_sums(&metric.corner_angles());
            for v in metric.mesh().vertex_ids().filter(|&v| !metric.mesh().is_boundary_vertex(v)) {
                assert!((sums[v.index()] - 2.0 * PI).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_writes_log_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut metric = bumpy_grid();
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Relaxed, &params);
        let newton = NewtonParameters::default().with_checkpoints(1, dir.path());

        let report = newton_solve(&mut metric, &layout, &newton, None, None).unwrap();
        assert!(report.status.is_converged());
        assert!(dir.path().join("newton_relaxed_log.csv").exists());

        let checkpoint = Checkpoint::load(&Checkpoint::path_in(dir.path(), ConstraintMode::Relaxed)).unwrap();
        assert_eq!(checkpoint.iteration, report.iterations);
        assert_eq!(checkpoint.fingerprint, layout.fingerprint(&metric));
    }
}
