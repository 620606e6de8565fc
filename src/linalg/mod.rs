//! Sparse linear solvers.
//!
//! The Newton core and the field smoother both reduce to symmetric positive
//! (semi-)definite systems. Each back end implements [`LinearSolver`] and is
//! selected by name:
//!
//! | Name | Back end |
//! |------|----------|
//! | `ldlt` | in-crate sparse LDLᵀ ([`ldlt::LdltFactor`]) |
//! | `cholesky` | `nalgebra_sparse` sparse Cholesky |
//! | `dense` | dense `nalgebra` Cholesky with LU fallback |
//! | `cg` | conjugate gradient ([`cg::conjugate_gradient`]) |
//!
//! # Example
//!
//! ```
//! use penner::linalg::{solver_from_name, symmetric_from_triplets};
//! use nalgebra::DVector;
//!
//! let a = symmetric_from_triplets(2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]);
//! let b = DVector::from_vec(vec![1.0, 2.0]);
//!
//! let solver = solver_from_name("ldlt").unwrap();
//! let x = solver.factor_and_solve(&a, &b).unwrap();
//! assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
//! ```

pub mod cg;
pub mod ldlt;

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::{MeshError, Result};

pub use cg::{conjugate_gradient, csc_mul_vec, csc_transpose_mul_vec};
pub use ldlt::LdltFactor;

/// Names accepted by [`solver_from_name`].
pub const SOLVER_NAMES: [&str; 4] = ["ldlt", "cholesky", "dense", "cg"];

/// A strategy for solving symmetric positive definite systems.
pub trait LinearSolver: Debug + Send + Sync {
    /// Short name of the back end.
    fn name(&self) -> &'static str;

    /// Factor `a` and solve `a x = b`.
    fn factor_and_solve(&self, a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Look up a solver back end by name.
pub fn solver_from_name(name: &str) -> Result<Box<dyn LinearSolver>> {
    match name.to_lowercase().as_str() {
        "ldlt" => Ok(Box::new(LdltSolver)),
        "cholesky" => Ok(Box::new(CholeskySolver)),
        "dense" => Ok(Box::new(DenseSolver)),
        "cg" => Ok(Box::new(ConjugateGradientSolver::default())),
        _ => Err(MeshError::invalid_param(
            "solver",
            name,
            "expected one of ldlt, cholesky, dense, cg",
        )),
    }
}

/// Assemble an `n x n` CSC matrix from triplets, summing duplicates.
pub fn symmetric_from_triplets(n: usize, triplets: &[(usize, usize, f64)]) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for &(i, j, v) in triplets {
        coo.push(i, j, v);
    }
    CscMatrix::from(&coo)
}

/// Return `a + eps I`.
pub fn add_diagonal(a: &CscMatrix<f64>, eps: f64) -> CscMatrix<f64> {
    let n = a.nrows().min(a.ncols());
    let mut coo = CooMatrix::new(a.nrows(), a.ncols());
    for (i, j, &v) in a.triplet_iter() {
        coo.push(i, j, v);
    }
    for i in 0..n {
        coo.push(i, i, eps);
    }
    CscMatrix::from(&coo)
}

/// In-crate sparse LDLᵀ.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdltSolver;

impl LinearSolver for LdltSolver {
    fn name(&self) -> &'static str {
        "ldlt"
    }

    fn factor_and_solve(&self, a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        LdltFactor::factor(a)?.solve(b)
    }
}

/// Sparse Cholesky from `nalgebra_sparse`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CholeskySolver;

impl LinearSolver for CholeskySolver {
    fn name(&self) -> &'static str {
        "cholesky"
    }

    fn factor_and_solve(&self, a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        let factor = CscCholesky::factor(a).map_err(|e| MeshError::LinearSolve {
            solver: "cholesky",
            reason: format!("{:?}", e),
        })?;
        let rhs = DMatrix::from_column_slice(b.len(), 1, b.as_slice());
        let x = factor.solve(&rhs);
        let x = DVector::from_column_slice(x.as_slice());
        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(MeshError::LinearSolve {
                solver: "cholesky",
                reason: "solution is not finite".to_string(),
            })
        }
    }
}

/// Dense Cholesky with an LU fallback, for small systems and debugging.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseSolver;

impl LinearSolver for DenseSolver {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn factor_and_solve(&self, a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        let mut dense = DMatrix::<f64>::zeros(a.nrows(), a.ncols());
        for (i, j, &v) in a.triplet_iter() {
            dense[(i, j)] += v;
        }

        if let Some(chol) = dense.clone().cholesky() {
            return Ok(chol.solve(b));
        }
        log::warn!("dense Cholesky failed, falling back to LU");
        dense
            .lu()
            .solve(b)
            .filter(|x| x.iter().all(|v| v.is_finite()))
            .ok_or_else(|| MeshError::LinearSolve {
                solver: "dense",
                reason: "matrix is singular".to_string(),
            })
    }
}

/// Conjugate gradient with a relative residual tolerance.
#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradientSolver {
    /// Maximum CG iterations; zero means twice the system size.
    pub max_iterations: usize,
    /// Relative residual tolerance.
    pub tolerance: f64,
}

impl Default for ConjugateGradientSolver {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            tolerance: 1e-12,
        }
    }
}

impl LinearSolver for ConjugateGradientSolver {
    fn name(&self) -> &'static str {
        "cg"
    }

    fn factor_and_solve(&self, a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        let max_iter = if self.max_iterations == 0 {
            (2 * b.len()).max(100)
        } else {
            self.max_iterations
        };
        conjugate_gradient(a, b, None, max_iter, self.tolerance).map_err(|e| match e {
            MeshError::ConvergenceFailed { iterations } => MeshError::LinearSolve {
                solver: "cg",
                reason: format!("no convergence after {} iterations", iterations),
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_plus_identity(n: usize) -> CscMatrix<f64> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 1.0));
            if i + 1 < n {
                triplets.push((i, i, 1.0));
                triplets.push((i + 1, i + 1, 1.0));
                triplets.push((i, i + 1, -1.0));
                triplets.push((i + 1, i, -1.0));
            }
        }
        symmetric_from_triplets(n, &triplets)
    }

    #[test]
    fn test_every_backend_solves_spd() {
        let a = laplacian_plus_identity(12);
        let b = DVector::from_fn(12, |i, _| (i as f64).sin());

        for name in SOLVER_NAMES {
            let solver = solver_from_name(name).unwrap();
            assert_eq!(solver.name(), name);
            let x = solver.factor_and_solve(&a, &b).unwrap();
            let residual = (csc_mul_vec(&a, &x) - &b).norm();
            assert!(residual < 1e-9, "{} residual {}", name, residual);
        }
    }

    #[test]
    fn test_unknown_solver() {
        assert!(matches!(
            solver_from_name("qr"),
            Err(MeshError::InvalidParameter { name: "solver", .. })
        ));
    }

    #[test]
    fn test_add_diagonal() {
        let a = symmetric_from_triplets(2, &[(0, 1, 2.0), (1, 0, 2.0)]);
        let b = add_diagonal(&a, 0.5);
        let x = csc_mul_vec(&b, &DVector::from_vec(vec![1.0, 1.0]));
        assert!((x[0] - 2.5).abs() < 1e-15);
        assert!((x[1] - 2.5).abs() < 1e-15);
    }
}
