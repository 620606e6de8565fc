//! Angle and holonomy constraints of a marked metric.

use std::fmt;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::marked::{CornerAngles, MarkedPennerConeMetric};
use super::MarkedMetricParameters;
use crate::mesh::{Components, FaceId, VertexId};

/// Which vertex constraints a solve enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintMode {
    /// Every vertex and loop constraint.
    Full,
    /// Interior vertices, hard boundary vertices, and loops.
    Relaxed,
}

impl ConstraintMode {
    /// Lowercase name, used in file names.
    pub fn name(self) -> &'static str {
        match self {
            ConstraintMode::Full => "full",
            ConstraintMode::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for ConstraintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies the constraint system a set of coordinates was solved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Vertex count of the metric mesh.
    pub num_vertices: usize,
    /// Edge count of the metric mesh.
    pub num_edges: usize,
    /// Face count of the metric mesh.
    pub num_faces: usize,
    /// Number of constraint rows.
    pub num_constraints: usize,
    /// FNV-1a hash of targets and constraint indices.
    pub hash: u64,
}

impl Fingerprint {
    /// Describe the first difference from `other`, if any.
    pub fn mismatch(&self, other: &Fingerprint) -> Option<String> {
        let counts = [
            ("vertices", self.num_vertices, other.num_vertices),
            ("edges", self.num_edges, other.num_edges),
            ("faces", self.num_faces, other.num_faces),
            ("constraints", self.num_constraints, other.num_constraints),
        ];
        for (what, ours, theirs) in counts {
            if ours != theirs {
                return Some(format!("{} count {} does not match {}", what, theirs, ours));
            }
        }
        (self.hash != other.hash).then(|| "cone angle or loop targets differ".to_string())
    }
}

struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write_u64(&mut self, value: u64) {
        for byte in value.to_le_bytes() {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }
}

/// The constrained vertices and loops for one [`ConstraintMode`].
///
/// Each row of the residual is either `Σ angles(v) − Θ_v` for a constrained
/// vertex or `holonomy(γ) − target(γ)` for a kept loop. Vertex rows come
/// first, in vertex order.
#[derive(Debug, Clone)]
pub struct ConstraintLayout {
    mode: ConstraintMode,
    vertices: Vec<VertexId>,
    loops: Vec<usize>,
    targets: Vec<f64>,
    /// Per half-edge: rows in which the angle opposite it appears, with sign.
    terms: Vec<Vec<(usize, f64)>>,
    /// Boundary vertices a full solve would constrain but this layout frees.
    soft_boundary: Vec<VertexId>,
}

impl ConstraintLayout {
    /// Select the constraints of `metric` for `mode`.
    pub fn new(metric: &MarkedPennerConeMetric, mode: ConstraintMode, params: &MarkedMetricParameters) -> Self {
        let mesh = metric.mesh();

        let constrained: Vec<bool> = mesh
            .vertex_ids()
            .map(|v| {
                if !mesh.is_boundary_vertex(v) {
                    return true;
                }
                match mode {
                    _ if params.remove_symmetry => false,
                    ConstraintMode::Full => true,
                    ConstraintMode::Relaxed => metric.is_hard(v),
                }
            })
            .collect();
        let soft_boundary = match mode {
            ConstraintMode::Relaxed if !params.remove_symmetry => mesh
                .vertex_ids()
                .filter(|v| mesh.is_boundary_vertex(*v) && !constrained[v.index()])
                .collect(),
            _ => Vec::new(),
        };
        let loops: Vec<usize> = if params.remove_loop_constraints {
            Vec::new()
        } else {
            (0..metric.loops().len()).collect()
        };
        Self::assemble(metric, mode, constrained, loops, soft_boundary)
    }

    /// This layout with its soft boundary vertices held at their targets.
    ///
    /// Returns `None` when there is nothing to pin. The result keeps this
    /// layout's mode and loops.
    pub fn pin_soft_boundary(&self, metric: &MarkedPennerConeMetric) -> Option<ConstraintLayout> {
        if self.soft_boundary.is_empty() {
            return None;
        }
        let mut constrained = vec![false; metric.mesh().num_vertices()];
        for v in self.vertices.iter().chain(&self.soft_boundary) {
            constrained[v.index()] = true;
        }
        Some(Self::assemble(metric, self.mode, constrained, self.loops.clone(), Vec::new()))
    }

    fn assemble(
        metric: &MarkedPennerConeMetric,
        mode: ConstraintMode,
        mut constrained: Vec<bool>,
        loops: Vec<usize>,
        soft_boundary: Vec<VertexId>,
    ) -> Self {
        let mesh = metric.mesh();
        let components = Components::new(mesh);

        // Gauss-Bonnet makes one constraint redundant on a fully constrained component
        for group in components.vertices_by_component() {
            if group.iter().all(|v| constrained[v.index()]) {
                if let Some(last) = group.last() {
                    constrained[last.index()] = false;
                }
            }
        }

        let vertices: Vec<VertexId> = mesh.vertex_ids().filter(|v| constrained[v.index()]).collect();
        let mut terms = vec![Vec::new(); mesh.num_halfedges()];
        let mut targets = Vec::with_capacity(vertices.len() + loops.len());
        for (row, &v) in vertices.iter().enumerate() {
            for h in metric.vertex_corners(v) {
                terms[h.index()].push((row, 1.0));
            }
            targets.push(metric.th_hat()[v.index()]);
        }
        for &i in &loops {
            let row = targets.len();
            let dual_loop = &metric.loops()[i];
            for (h, sign) in dual_loop.angle_terms(mesh) {
                terms[h.index()].push((row, sign));
            }
            targets.push(dual_loop.target);
        }

        Self {
            mode,
            vertices,
            loops,
            targets,
            terms,
            soft_boundary,
        }
    }

    /// The mode this layout was built for.
    pub fn mode(&self) -> ConstraintMode {
        self.mode
    }

    /// Number of residual rows.
    pub fn num_constraints(&self) -> usize {
        self.targets.len()
    }

    /// Constrained vertices, one row each.
    pub fn constrained_vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    /// Boundary vertices left free that [`Self::pin_soft_boundary`] would constrain.
    pub fn soft_boundary(&self) -> &[VertexId] {
        &self.soft_boundary
    }

    /// Indices of the kept loops in the metric.
    pub fn loop_indices(&self) -> &[usize] {
        &self.loops
    }

    /// Constraint residual for the given angles.
    pub fn residual(&self, angles: &CornerAngles) -> DVector<f64> {
        let mut residual = DVector::from_iterator(self.targets.len(), self.targets.iter().map(|t| -t));
        for (h, rows) in self.terms.iter().enumerate() {
            for &(row, sign) in rows {
                residual[row] += sign * angles.angle[h];
            }
        }
        residual
    }

    /// Jacobian of the residual with respect to the edge coordinates.
    ///
    /// The result has one row per constraint and one column per edge.
    pub fn jacobian(&self, metric: &MarkedPennerConeMetric, angles: &CornerAngles) -> CscMatrix<f64> {
        let mesh = metric.mesh();
        let blocks = metric.angle_derivatives(angles);

        let per_face: Vec<Vec<(usize, usize, f64)>> = blocks
            .par_iter()
            .enumerate()
            .map(|(f, block)| {
                let hs = mesh.face_halfedges(FaceId::new(f));
                let mut entries = Vec::new();
                for (i, hi) in hs.iter().enumerate() {
                    for &(row, sign) in &self.terms[hi.index()] {
                        for (j, hj) in hs.iter().enumerate() {
                            entries.push((row, mesh.edge_of(*hj).index(), sign * block[i][j]));
                        }
                    }
                }
                entries
            })
            .collect();

        let mut coo = CooMatrix::new(self.num_constraints(), mesh.num_edges());
        for (row, col, value) in per_face.into_iter().flatten() {
            coo.push(row, col, value);
        }
        CscMatrix::from(&coo)
    }

    /// Fingerprint of the metric and this layout.
    pub fn fingerprint(&self, metric: &MarkedPennerConeMetric) -> Fingerprint {
        let mut hasher = Fnv1a::new();
        for theta in metric.th_hat() {
            hasher.write_u64(theta.to_bits());
        }
        for target in &self.targets {
            hasher.write_u64(target.to_bits());
        }
        for v in &self.vertices {
            hasher.write_u64(v.index() as u64);
        }
        for &i in &self.loops {
            hasher.write_u64(i as u64);
        }

        let mesh = metric.mesh();
        Fingerprint {
            num_vertices: mesh.num_vertices(),
            num_edges: mesh.num_edges(),
            num_faces: mesh.num_faces(),
            num_constraints: self.num_constraints(),
            hash: hasher.0,
        }
    }
}

/// Compute `J Jᵀ` column by column.
pub fn normal_matrix(jacobian: &CscMatrix<f64>) -> CscMatrix<f64> {
    let m = jacobian.nrows();
    let mut coo = CooMatrix::new(m, m);
    for col in jacobian.col_iter() {
        let rows = col.row_indices();
        let values = col.values();
        for (a, &i) in rows.iter().enumerate() {
            for (b, &k) in rows.iter().enumerate() {
                coo.push(i, k, values[a] * values[b]);
            }
        }
    }
    CscMatrix::from(&coo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, shapes};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn grid_metric() -> MarkedPennerConeMetric {
        let (vertices, faces) = shapes::grid(3, 3, 1.0, 1.0);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let mut metric = MarkedPennerConeMetric::new(mesh, 2.0, false);
        let th_hat = metric
            .mesh()
            .vertex_ids()
            .map(|v| {
                let sum: f64 = metric
                    .vertex_corners(v)
                    .map(|h| metric.corner_angles().angle[h.index()])
                    .sum();
                if metric.mesh().is_boundary_vertex(v) {
                    sum
                } else {
                    2.0 * PI
                }
            })
            .collect();
        metric.set_th_hat(th_hat).unwrap();
        metric
    }

    #[test]
    fn test_flat_grid_has_zero_residual() {
        let metric = grid_metric();
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &MarkedMetricParameters::default());
        let residual = layout.residual(&metric.corner_angles());
        assert_relative_eq!(residual.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_relaxed_drops_soft_boundary() {
        let metric = grid_metric();
        let params = MarkedMetricParameters::default();
        let full = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        let relaxed = ConstraintLayout::new(&metric, ConstraintMode::Relaxed, &params);

        // 16 vertices, the component is fully constrained so one is dropped
        assert_eq!(full.num_constraints(), 15);
        // only the 4 interior vertices remain
        assert_eq!(relaxed.num_constraints(), 4);
        assert_eq!(relaxed.mode(), ConstraintMode::Relaxed);
        assert_eq!(relaxed.soft_boundary().len(), 12);
        assert!(full.soft_boundary().is_empty());
    }

    #[test]
    fn test_pinned_layout_matches_full_rows() {
        let metric = grid_metric();
        let params = MarkedMetricParameters::default();
        let full = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        let relaxed = ConstraintLayout::new(&metric, ConstraintMode::Relaxed, &params);

        let pinned = relaxed.pin_soft_boundary(&metric).unwrap();
        assert_eq!(pinned.mode(), ConstraintMode::Relaxed);
        assert_eq!(pinned.constrained_vertices(), full.constrained_vertices());
        assert!(pinned.pin_soft_boundary(&metric).is_none());
        assert!(full.pin_soft_boundary(&metric).is_none());

        let symmetric = MarkedMetricParameters::default().with_remove_symmetry(true);
        let relaxed = ConstraintLayout::new(&metric, ConstraintMode::Relaxed, &symmetric);
        assert!(relaxed.pin_soft_boundary(&metric).is_none());
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let metric = grid_metric();
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &MarkedMetricParameters::default());
        let angles = metric.corner_angles();
        let jacobian = layout.jacobian(&metric, &angles);
        let base = layout.residual(&angles);

        let mut dense = nalgebra::DMatrix::<f64>::zeros(jacobian.nrows(), jacobian.ncols());
        for (i, j, &v) in jacobian.triplet_iter() {
            dense[(i, j)] += v;
        }

        let delta = 1e-6;
        for e in [0, 7, 15] {
            let mut coords = metric.coords().clone();
            coords[e] += delta;
            let perturbed = layout.residual(&metric.corner_angles_at(&coords));
            for row in 0..layout.num_constraints() {
                let fd = (perturbed[row] - base[row]) / delta;
                assert_relative_eq!(dense[(row, e)], fd, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_normal_matrix_is_symmetric() {
        let metric = grid_metric();
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &MarkedMetricParameters::default());
        let jacobian = layout.jacobian(&metric, &metric.corner_angles());
        let normal = normal_matrix(&jacobian);

        let mut dense = nalgebra::DMatrix::<f64>::zeros(normal.nrows(), normal.ncols());
        for (i, j, &v) in normal.triplet_iter() {
            dense[(i, j)] += v;
        }
        assert_relative_eq!(dense.clone(), dense.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_fingerprint_detects_target_change() {
        let mut metric = grid_metric();
        let params = MarkedMetricParameters::default();
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        let before = layout.fingerprint(&metric);
        assert!(before.mismatch(&layout.fingerprint(&metric)).is_none());

        let mut th_hat = metric.th_hat().to_vec();
        th_hat[5] += PI / 2.0;
        metric.set_th_hat(th_hat).unwrap();
        let layout = ConstraintLayout::new(&metric, ConstraintMode::Full, &params);
        assert!(before.mismatch(&layout.fingerprint(&metric)).is_some());
    }
}
