//! Sparse LDLᵀ factorization for symmetric systems.
//!
//! An up-looking factorization over the elimination tree of the matrix. Only
//! the upper triangle (row <= column) of each column is read, so matrices
//! stored with both triangles or only the upper one give the same factor.
//! No fill-reducing permutation is applied.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use crate::error::{MeshError, Result};

const NONE: usize = usize::MAX;

/// Relative pivot size below which the matrix is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-13;

/// A numeric LDLᵀ factor with unit lower-triangular L stored by columns.
#[derive(Debug, Clone)]
pub struct LdltFactor {
    n: usize,
    l_col_ptr: Vec<usize>,
    l_row_idx: Vec<usize>,
    l_values: Vec<f64>,
    diagonal: Vec<f64>,
}

impl LdltFactor {
    /// Factor a symmetric positive definite matrix.
    ///
    /// Fails on non-square input and on zero, negative, or non-finite pivots.
    pub fn factor(a: &CscMatrix<f64>) -> Result<Self> {
        let n = a.ncols();
        if a.nrows() != n {
            return Err(MeshError::size_mismatch("ldlt matrix rows", n, a.nrows()));
        }

        let (parent, l_col_ptr) = symbolic(a);
        let nnz = l_col_ptr[n];

        let mut l_row_idx = vec![0usize; nnz];
        let mut l_values = vec![0.0; nnz];
        let mut diagonal = vec![0.0; n];
        let mut l_nnz = vec![0usize; n];

        let mut y = vec![0.0; n];
        let mut flag = vec![NONE; n];
        let mut pattern = vec![0usize; n];

        for (k, col) in a.col_iter().enumerate() {
            // Scatter the upper part of column k and find the nonzero pattern of row k of L
            let mut top = n;
            flag[k] = k;
            let mut diag_scale = 0.0f64;
            for (&row, &value) in col.row_indices().iter().zip(col.values()) {
                if row > k {
                    continue;
                }
                y[row] += value;
                if row == k {
                    diag_scale = value.abs();
                }
                let mut len = 0;
                let mut i = row;
                while flag[i] != k {
                    pattern[len] = i;
                    len += 1;
                    flag[i] = k;
                    i = parent[i];
                }
                while len > 0 {
                    top -= 1;
                    len -= 1;
                    pattern[top] = pattern[len];
                }
            }

            diagonal[k] = y[k];
            y[k] = 0.0;
            while top < n {
                let i = pattern[top];
                top += 1;
                let yi = y[i];
                y[i] = 0.0;
                let p_end = l_col_ptr[i] + l_nnz[i];
                for p in l_col_ptr[i]..p_end {
                    y[l_row_idx[p]] -= l_values[p] * yi;
                }
                let l_ki = yi / diagonal[i];
                diagonal[k] -= l_ki * yi;
                l_row_idx[p_end] = k;
                l_values[p_end] = l_ki;
                l_nnz[i] += 1;
            }

            let d = diagonal[k];
            if !d.is_finite() || d <= PIVOT_TOLERANCE * diag_scale.max(f64::MIN_POSITIVE) {
                return Err(MeshError::LinearSolve {
                    solver: "ldlt",
                    reason: format!("pivot {} at column {} is not positive", d, k),
                });
            }
        }

        Ok(Self {
            n,
            l_col_ptr,
            l_row_idx,
            l_values,
            diagonal,
        })
    }

    /// Number of strictly lower nonzeros in L.
    pub fn nnz(&self) -> usize {
        self.l_values.len()
    }

    /// Solve A x = b with the stored factor.
    pub fn solve(&self, b: &DVector<f64>) -> Result<DVector<f64>> {
        if b.len() != self.n {
            return Err(MeshError::size_mismatch("ldlt right-hand side", self.n, b.len()));
        }
        let mut x = b.clone();

        for j in 0..self.n {
            let xj = x[j];
            for p in self.l_col_ptr[j]..self.l_col_ptr[j + 1] {
                x[self.l_row_idx[p]] -= self.l_values[p] * xj;
            }
        }
        for j in 0..self.n {
            x[j] /= self.diagonal[j];
        }
        for j in (0..self.n).rev() {
            let mut xj = x[j];
            for p in self.l_col_ptr[j]..self.l_col_ptr[j + 1] {
                xj -= self.l_values[p] * x[self.l_row_idx[p]];
            }
            x[j] = xj;
        }

        Ok(x)
    }
}

/// Elimination tree and column pointers of L.
fn symbolic(a: &CscMatrix<f64>) -> (Vec<usize>, Vec<usize>) {
    let n = a.ncols();
    let mut parent = vec![NONE; n];
    let mut flag = vec![NONE; n];
    let mut l_nnz = vec![0usize; n];

    for (k, col) in a.col_iter().enumerate() {
        flag[k] = k;
        for &row in col.row_indices() {
            if row >= k {
                continue;
            }
            let mut i = row;
            while flag[i] != k {
                if parent[i] == NONE {
                    parent[i] = k;
                }
                l_nnz[i] += 1;
                flag[i] = k;
                i = parent[i];
            }
        }
    }

    let mut col_ptr = vec![0usize; n + 1];
    for k in 0..n {
        col_ptr[k + 1] = col_ptr[k] + l_nnz[k];
    }
    (parent, col_ptr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{cg::csc_mul_vec, symmetric_from_triplets};

    #[test]
    fn test_ldlt_tridiagonal() {
        let n = 6;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 4.0));
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
                triplets.push((i + 1, i, -1.0));
            }
        }
        let a = symmetric_from_triplets(n, &triplets);
        let b = DVector::from_fn(n, |i, _| i as f64 + 1.0);

        let factor = LdltFactor::factor(&a).unwrap();
        let x = factor.solve(&b).unwrap();
        assert!((csc_mul_vec(&a, &x) - b).norm() < 1e-12);
        assert_eq!(factor.nnz(), n - 1);
    }

    #[test]
    fn test_ldlt_with_fill() {
        // arrow matrix with the hub first fills in completely
        let n = 5;
        let mut triplets = vec![(0, 0, 10.0)];
        for i in 1..n {
            triplets.push((i, i, 3.0));
            triplets.push((0, i, 1.0));
            triplets.push((i, 0, 1.0));
        }
        let a = symmetric_from_triplets(n, &triplets);
        let b = DVector::from_element(n, 1.0);

        let x = LdltFactor::factor(&a).unwrap().solve(&b).unwrap();
        assert!((csc_mul_vec(&a, &x) - b).norm() < 1e-12);
    }

    #[test]
    fn test_ldlt_singular() {
        // graph Laplacian of a path is singular
        let a = symmetric_from_triplets(
            3,
            &[
                (0, 0, 1.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 2.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 1.0),
            ],
        );
        assert!(matches!(
            LdltFactor::factor(&a),
            Err(MeshError::LinearSolve { solver: "ldlt", .. })
        ));
    }
}
