//! Conjugate gradient solver for sparse symmetric positive definite systems.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use crate::error::{MeshError, Result};

/// Multiply a CSC matrix by a vector: y = A * x.
pub fn csc_mul_vec(a: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.nrows());
    for (j, col) in a.col_iter().enumerate() {
        let xj = x[j];
        if xj == 0.0 {
            continue;
        }
        for (&i, &v) in col.row_indices().iter().zip(col.values()) {
            y[i] += v * xj;
        }
    }
    y
}

/// Multiply the transpose of a CSC matrix by a vector: y = Aᵀ * x.
pub fn csc_transpose_mul_vec(a: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.ncols());
    for (j, col) in a.col_iter().enumerate() {
        y[j] = col
            .row_indices()
            .iter()
            .zip(col.values())
            .map(|(&i, &v)| v * x[i])
            .sum();
    }
    y
}

/// Solve A*x = b using the Conjugate Gradient method.
///
/// Requires A to be symmetric positive definite.
///
/// # Arguments
///
/// * `a` - The system matrix (must be symmetric positive definite)
/// * `b` - The right-hand side vector
/// * `x0` - Optional initial guess (zeros if None)
/// * `max_iter` - Maximum number of iterations
/// * `tolerance` - Convergence tolerance (relative residual norm)
pub fn conjugate_gradient(
    a: &CscMatrix<f64>,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    max_iter: usize,
    tolerance: f64,
) -> Result<DVector<f64>> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        return Err(MeshError::size_mismatch("conjugate gradient system", n, a.nrows()));
    }

    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => DVector::zeros(n),
    };

    let b_norm = b.norm();
    if b_norm < 1e-15 {
        return Ok(x);
    }

    let mut r = b - csc_mul_vec(a, &x);
    let mut r_norm_sq = r.dot(&r);
    if r_norm_sq.sqrt() / b_norm < tolerance {
        return Ok(x);
    }

    let mut p = r.clone();

    for _iter in 0..max_iter {
        let ap = csc_mul_vec(a, &p);

        let p_ap = p.dot(&ap);
        if p_ap.abs() < 1e-15 {
            // singular or nearly so
            break;
        }
        let alpha = r_norm_sq / p_ap;

        x += alpha * &p;
        r -= alpha * &ap;

        let new_r_norm_sq = r.dot(&r);
        if new_r_norm_sq.sqrt() / b_norm < tolerance {
            return Ok(x);
        }

        let beta = new_r_norm_sq / r_norm_sq;
        p = &r + beta * &p;
        r_norm_sq = new_r_norm_sq;
    }

    Err(MeshError::ConvergenceFailed {
        iterations: max_iter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::symmetric_from_triplets;

    fn small_system() -> CscMatrix<f64> {
        // [ 4  1 ]
        // [ 1  3 ]
        symmetric_from_triplets(2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)])
    }

    #[test]
    fn test_mul_vec() {
        let a = small_system();
        let y = csc_mul_vec(&a, &DVector::from_vec(vec![1.0, 1.0]));
        assert!((y[0] - 5.0).abs() < 1e-12);
        assert!((y[1] - 4.0).abs() < 1e-12);

        let yt = csc_transpose_mul_vec(&a, &DVector::from_vec(vec![1.0, 0.0]));
        assert!((yt[0] - 4.0).abs() < 1e-12);
        assert!((yt[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cg_simple() {
        // solution: x = 1/11, y = 7/11
        let a = small_system();
        let b = DVector::from_vec(vec![1.0, 2.0]);

        let x = conjugate_gradient(&a, &b, None, 100, 1e-10).unwrap();

        assert!((x[0] - 1.0 / 11.0).abs() < 1e-8);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-8);
    }

    #[test]
    fn test_cg_with_initial_guess() {
        let a = small_system();
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x0 = DVector::from_vec(vec![0.1, 0.6]);

        let x = conjugate_gradient(&a, &b, Some(&x0), 100, 1e-10).unwrap();
        let residual = csc_mul_vec(&a, &x) - b;
        assert!(residual.norm() < 1e-8);
    }

    #[test]
    fn test_cg_dimension_mismatch() {
        let a = small_system();
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            conjugate_gradient(&a, &b, None, 10, 1e-10),
            Err(MeshError::SizeMismatch { .. })
        ));
    }
}
