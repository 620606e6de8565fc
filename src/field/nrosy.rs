//! Intrinsic N-RoSy fields with integer period jumps.

use std::f64::consts::PI;

use nalgebra::DVector;

use super::{wrap_angle, FieldDirections};
use crate::error::{MeshError, Result};
use crate::linalg::{
    add_diagonal, symmetric_from_triplets, ConjugateGradientSolver, LdltFactor, LdltSolver, LinearSolver,
};
use crate::mesh::{Components, HalfEdgeId, HalfEdgeMesh, VertexId};
use crate::metric::MarkedPennerConeMetric;

/// Symmetry order of a cross field.
pub const DEFAULT_ORDER: usize = 4;

/// Inverse iterations for components without fixed faces.
const INVERSE_ITERATIONS: usize = 20;

/// Diagonal shift of the connection Laplacian, which is singular on
/// components with trivial holonomy.
const LAPLACIAN_SHIFT: f64 = 1e-8;

/// Field angles, transport angles, and period jumps in cut-mesh face order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAngles {
    /// Field angle per face, relative to local edge 0.
    pub theta: Vec<f64>,
    /// Transport angle per face local edge.
    pub kappa: Vec<[f64; 3]>,
    /// Period jump per face local edge.
    pub period_jump: Vec<[i32; 3]>,
}

/// An N-RoSy field stored intrinsically on the faces of a metric mesh.
#[derive(Debug, Clone)]
pub struct IntrinsicNRosyField {
    pub(super) order: usize,
    /// Angle of each half-edge relative to its face's reference half-edge.
    pub(super) alpha: Vec<f64>,
    pub(super) kappa: Vec<f64>,
    pub(super) theta: Vec<f64>,
    pub(super) period_jump: Vec<i32>,
    pub(super) is_fixed: Vec<bool>,
}

impl Default for IntrinsicNRosyField {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

impl IntrinsicNRosyField {
    /// Create an empty field of the given symmetry order.
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            alpha: Vec::new(),
            kappa: Vec::new(),
            theta: Vec::new(),
            period_jump: Vec::new(),
            is_fixed: Vec::new(),
        }
    }

    /// Symmetry order N.
    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    /// The angle 2π/N between equivalent field directions.
    #[inline]
    pub fn period(&self) -> f64 {
        2.0 * PI / self.order as f64
    }

    /// Field angle per face.
    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    /// Transport angle per half-edge.
    pub fn kappa(&self) -> &[f64] {
        &self.kappa
    }

    /// Period jump per half-edge.
    pub fn period_jump(&self) -> &[i32] {
        &self.period_jump
    }

    /// Faces whose angle is held fixed when the field is re-solved.
    pub fn is_fixed(&self) -> &[bool] {
        &self.is_fixed
    }

    /// Compute reference angles and transport from the metric's corner angles.
    ///
    /// Resets the field to zero angles, zero jumps, and no fixed faces.
    pub fn initialize(&mut self, metric: &MarkedPennerConeMetric) {
        let mesh = metric.mesh();
        let angles = metric.corner_angles();

        self.alpha = vec![0.0; mesh.num_halfedges()];
        for f in mesh.face_ids() {
            let [h0, h1, h2] = mesh.face_halfedges(f);
            self.alpha[h0.index()] = 0.0;
            self.alpha[h1.index()] = PI - angles.angle[h2.index()];
            self.alpha[h2.index()] = self.alpha[h1.index()] + PI - angles.angle[h0.index()];
        }

        self.kappa = vec![0.0; mesh.num_halfedges()];
        for h in mesh.halfedge_ids() {
            let t = mesh.twin(h);
            if h > t || !is_crossing(mesh, h) {
                continue;
            }
            let k = wrap_angle(self.alpha[t.index()] + PI - self.alpha[h.index()]);
            self.kappa[h.index()] = k;
            self.kappa[t.index()] = -k;
        }

        self.theta = vec![0.0; mesh.num_faces()];
        self.period_jump = vec![0; mesh.num_halfedges()];
        self.is_fixed = vec![false; mesh.num_faces()];
    }

    /// Generate a smooth field that follows the fixed directions.
    ///
    /// Free angles come from the smoothest unit field matching the fixed
    /// faces. Period jumps are rounded once from those angles and the free
    /// angles are then re-solved in least squares with the jumps held.
    pub fn generate(&mut self, metric: &MarkedPennerConeMetric, directions: &FieldDirections) -> Result<()> {
        let mesh = metric.mesh();
        if directions.direction.len() != mesh.num_faces() {
            return Err(MeshError::size_mismatch("field directions", mesh.num_faces(), directions.direction.len()));
        }
        if directions.is_fixed.len() != mesh.num_faces() {
            return Err(MeshError::size_mismatch("fixed face flags", mesh.num_faces(), directions.is_fixed.len()));
        }

        self.initialize(metric);
        for f in mesh.face_ids() {
            if !directions.is_fixed[f.index()] {
                continue;
            }
            let Some(reference) = mesh.edge_vector(mesh.face_halfedge(f, 0)).try_normalize(0.0) else {
                continue;
            };
            let bitangent = mesh.face_normal(f).cross(&reference);
            let d = directions.direction[f.index()];
            self.theta[f.index()] = bitangent.dot(&d).atan2(reference.dot(&d));
        }
        self.is_fixed = directions.is_fixed.clone();

        self.solve_smoothest(mesh)?;
        self.round_period_jumps(mesh);
        self.solve_angles(mesh)?;

        log::info!(
            "generated {}-RoSy field with {} fixed faces and {} cones",
            self.order,
            directions.num_fixed(),
            self.cone_indices(metric).iter().filter(|i| **i != 0).count()
        );
        Ok(())
    }

    /// Load a stored field given in cut-mesh face order.
    ///
    /// `vtx_reindex` and `face_reindex` map metric vertices and faces to cut
    /// vertices and faces. Faces touching the boundary are held fixed if the
    /// field is re-solved later.
    #[allow(clippy::too_many_arguments)]
    pub fn set_field(
        &mut self,
        metric: &MarkedPennerConeMetric,
        vtx_reindex: &[usize],
        faces: &[[usize; 3]],
        face_reindex: &[usize],
        theta: &[f64],
        kappa: &[[f64; 3]],
        period_jump: &[[i32; 3]],
    ) -> Result<()> {
        let mesh = metric.mesh();
        check_reindex(mesh, vtx_reindex, faces, face_reindex)?;
        for (what, len) in [
            ("field angles", theta.len()),
            ("field transport angles", kappa.len()),
            ("field period jumps", period_jump.len()),
        ] {
            if len != faces.len() {
                return Err(MeshError::size_mismatch(what, faces.len(), len));
            }
        }

        self.initialize(metric);
        for f in mesh.face_ids() {
            let c = face_reindex[f.index()];
            let mut reference_alpha = 0.0;
            for h in mesh.face_halfedges(f) {
                let k = local_corner(mesh, h, vtx_reindex, &faces[c])?;
                self.kappa[h.index()] = kappa[c][k];
                self.period_jump[h.index()] = period_jump[c][k];
                if k == 0 {
                    reference_alpha = self.alpha[h.index()];
                }
            }
            self.theta[f.index()] = theta[c] + reference_alpha;
        }

        self.is_fixed = mesh
            .face_ids()
            .map(|f| mesh.face_halfedges(f).iter().any(|&h| mesh.is_boundary_halfedge(mesh.twin(h))))
            .collect();
        Ok(())
    }

    /// Read the field back in cut-mesh face order; the inverse of [`Self::set_field`].
    pub fn get_field(
        &self,
        metric: &MarkedPennerConeMetric,
        vtx_reindex: &[usize],
        faces: &[[usize; 3]],
        face_reindex: &[usize],
    ) -> Result<FieldAngles> {
        let mesh = metric.mesh();
        check_reindex(mesh, vtx_reindex, faces, face_reindex)?;

        let mut angles = FieldAngles {
            theta: vec![0.0; faces.len()],
            kappa: vec![[0.0; 3]; faces.len()],
            period_jump: vec![[0; 3]; faces.len()],
        };
        for f in mesh.face_ids() {
            let c = face_reindex[f.index()];
            let mut reference_alpha = 0.0;
            for h in mesh.face_halfedges(f) {
                let k = local_corner(mesh, h, vtx_reindex, &faces[c])?;
                angles.kappa[c][k] = self.kappa[h.index()];
                angles.period_jump[c][k] = self.period_jump[h.index()];
                if k == 0 {
                    reference_alpha = self.alpha[h.index()];
                }
            }
            angles.theta[c] = self.theta[f.index()] - reference_alpha;
        }
        Ok(angles)
    }

    /// Rotation form `ω(h) = θ_g − θ_f − κ(h) − (2π/N) p(h)`, zero on the boundary.
    pub fn rotation_form(&self, metric: &MarkedPennerConeMetric) -> Vec<f64> {
        let mesh = metric.mesh();
        mesh.halfedge_ids()
            .map(|h| {
                if !is_crossing(mesh, h) {
                    return 0.0;
                }
                let f = mesh.face_of(h);
                let g = mesh.face_of(mesh.twin(h));
                self.theta[g.index()]
                    - self.theta[f.index()]
                    - self.kappa[h.index()]
                    - self.period() * self.period_jump[h.index()] as f64
            })
            .collect()
    }

    /// Target cone angles implied by the field.
    ///
    /// Each vertex sums its corner angles and the rotation form over its
    /// outgoing interior crossings. Interior sums are exact multiples of 2π/N
    /// up to rounding; boundary sums are snapped and kept at least 2π/N, and
    /// Gauss-Bonnet (`ΣΘ = π F`) is restored per component by moving the
    /// boundary targets with the largest rounding error.
    pub fn cone_angles(&self, metric: &MarkedPennerConeMetric) -> Vec<f64> {
        let mesh = metric.mesh();
        let period = self.period();
        let omega = self.rotation_form(metric);
        let angles = metric.corner_angles();

        let raw: Vec<f64> = mesh
            .vertex_ids()
            .map(|v| {
                let corners: f64 = metric.vertex_corners(v).map(|h| angles.angle[h.index()]).sum();
                let rotation: f64 = mesh
                    .vertex_halfedges(v)
                    .filter(|&h| is_crossing(mesh, h))
                    .map(|h| omega[h.index()])
                    .sum();
                corners + rotation
            })
            .collect();

        let mut th_hat: Vec<f64> = mesh
            .vertex_ids()
            .map(|v| {
                let snapped = period * (raw[v.index()] / period).round();
                if mesh.is_boundary_vertex(v) {
                    snapped.max(period)
                } else {
                    snapped
                }
            })
            .collect();

        let components = Components::new(mesh);
        let mut face_counts = vec![0usize; components.count];
        for &c in &components.face_component {
            face_counts[c] += 1;
        }
        for (c, group) in components.vertices_by_component().into_iter().enumerate() {
            if face_counts[c] == 0 {
                continue;
            }
            let total: f64 = group.iter().map(|v| th_hat[v.index()]).sum();
            let mut steps = ((total - PI * face_counts[c] as f64) / period).round() as i64;
            let boundary: Vec<VertexId> = group.into_iter().filter(|&v| mesh.is_boundary_vertex(v)).collect();

            while steps != 0 {
                let error = |v: &VertexId| th_hat[v.index()] - raw[v.index()];
                let candidate = if steps > 0 {
                    boundary
                        .iter()
                        .filter(|v| th_hat[v.index()] > period + 1e-12)
                        .max_by(|a, b| error(a).total_cmp(&error(b)))
                } else {
                    boundary.iter().min_by(|a, b| error(a).total_cmp(&error(b)))
                };
                let Some(&v) = candidate else {
                    log::warn!("cannot restore Gauss-Bonnet on component {} ({} steps left)", c, steps);
                    break;
                };
                th_hat[v.index()] -= period * steps.signum() as f64;
                steps -= steps.signum();
            }
        }
        th_hat
    }

    /// Index `round(N Θ / 2π) − N` per interior vertex, zero on the boundary.
    pub fn cone_indices(&self, metric: &MarkedPennerConeMetric) -> Vec<i32> {
        let mesh = metric.mesh();
        let n = self.order as i32;
        self.cone_angles(metric)
            .iter()
            .enumerate()
            .map(|(v, theta)| {
                if mesh.is_boundary_vertex(VertexId::new(v)) {
                    0
                } else {
                    (theta / self.period()).round() as i32 - n
                }
            })
            .collect()
    }

    /// Fixed faces plus one root face in each component without any.
    pub(super) fn anchors(&self, mesh: &HalfEdgeMesh) -> Vec<bool> {
        let components = Components::new(mesh);
        let mut anchors = self.is_fixed.clone();
        let mut anchored = vec![false; components.count];
        for f in mesh.face_ids() {
            if anchors[f.index()] {
                anchored[components.face_component[f.index()]] = true;
            }
        }
        for f in mesh.face_ids() {
            let c = components.face_component[f.index()];
            if !anchored[c] {
                anchors[f.index()] = true;
                anchored[c] = true;
            }
        }
        anchors
    }

    /// Smoothest unit field `u_f = e^{iNθ_f}` over the free faces.
    ///
    /// Minimizes `Σ |u_g − e^{iNκ} u_f|²` over crossing edges. Components
    /// holding fixed faces take the Dirichlet solution; the others take the
    /// lowest eigenvector of the connection Laplacian by inverse iteration.
    /// Only `theta` of free faces is written.
    fn solve_smoothest(&mut self, mesh: &HalfEdgeMesh) -> Result<()> {
        let mut free_index = vec![usize::MAX; mesh.num_faces()];
        let mut num_free = 0;
        for f in mesh.face_ids().filter(|f| !self.is_fixed[f.index()]) {
            free_index[f.index()] = num_free;
            num_free += 1;
        }
        if num_free == 0 {
            return Ok(());
        }

        let n = self.order as f64;
        let unit = |theta: f64| ((n * theta).cos(), (n * theta).sin());
        let mut triplets = Vec::new();
        let mut rhs = DVector::<f64>::zeros(2 * num_free);
        for h in mesh.halfedge_ids() {
            let t = mesh.twin(h);
            if h > t || !is_crossing(mesh, h) {
                continue;
            }
            let (f, g) = (mesh.face_of(h).index(), mesh.face_of(t).index());
            let (c, s) = unit(self.kappa[h.index()]);
            match (free_index[f], free_index[g]) {
                (usize::MAX, usize::MAX) => {}
                (i, usize::MAX) => {
                    let (gr, gi) = unit(self.theta[g]);
                    triplets.extend([(2 * i, 2 * i, 1.0), (2 * i + 1, 2 * i + 1, 1.0)]);
                    rhs[2 * i] += c * gr + s * gi;
                    rhs[2 * i + 1] += c * gi - s * gr;
                }
                (usize::MAX, j) => {
                    let (fr, fi) = unit(self.theta[f]);
                    triplets.extend([(2 * j, 2 * j, 1.0), (2 * j + 1, 2 * j + 1, 1.0)]);
                    rhs[2 * j] += c * fr - s * fi;
                    rhs[2 * j + 1] += s * fr + c * fi;
                }
                (i, j) => {
                    let (i, j) = (2 * i, 2 * j);
                    for k in 0..2 {
                        triplets.push((i + k, i + k, 1.0));
                        triplets.push((j + k, j + k, 1.0));
                    }
                    // block (g, f) is -R with R the rotation by Nκ; block (f, g) is -Rᵀ
                    for (a, b, v) in [(0, 0, -c), (0, 1, s), (1, 0, -s), (1, 1, -c)] {
                        triplets.push((j + a, i + b, v));
                        triplets.push((i + b, j + a, v));
                    }
                }
            }
        }
        let system = add_diagonal(&symmetric_from_triplets(2 * num_free, &triplets), LAPLACIAN_SHIFT);
        let factor = LdltFactor::factor(&system)?;

        let components = Components::new(mesh);
        let mut anchored = vec![false; components.count];
        for f in mesh.face_ids().filter(|f| self.is_fixed[f.index()]) {
            anchored[components.face_component[f.index()]] = true;
        }

        let mut u = factor.solve(&rhs)?;
        if anchored.iter().any(|a| !a) {
            let mut eigen = DVector::<f64>::zeros(2 * num_free);
            for f in mesh.face_ids() {
                let i = free_index[f.index()];
                if i != usize::MAX && !anchored[components.face_component[f.index()]] {
                    eigen[2 * i] = 1.0;
                }
            }
            for _ in 0..INVERSE_ITERATIONS {
                eigen = factor.solve(&eigen)?;
                let mut norms = vec![0.0; components.count];
                for f in mesh.face_ids() {
                    let i = free_index[f.index()];
                    if i != usize::MAX {
                        norms[components.face_component[f.index()]] += eigen[2 * i].powi(2) + eigen[2 * i + 1].powi(2);
                    }
                }
                for f in mesh.face_ids() {
                    let i = free_index[f.index()];
                    let norm = norms[components.face_component[f.index()]].sqrt();
                    if i != usize::MAX && norm > 0.0 {
                        eigen[2 * i] /= norm;
                        eigen[2 * i + 1] /= norm;
                    }
                }
            }
            u += eigen;
        }

        for f in mesh.face_ids() {
            let i = free_index[f.index()];
            if i != usize::MAX {
                self.theta[f.index()] = u[2 * i + 1].atan2(u[2 * i]) / n;
            }
        }
        Ok(())
    }

    /// Least-squares angle solve with the period jumps held.
    pub(super) fn solve_angles(&mut self, mesh: &HalfEdgeMesh) -> Result<()> {
        let anchors = self.anchors(mesh);
        self.solve_free_angles(mesh, &anchors)
    }

    /// Round each jump to the integer nearest the current angles.
    fn round_period_jumps(&mut self, mesh: &HalfEdgeMesh) {
        let period = self.period();
        for h in mesh.halfedge_ids() {
            let t = mesh.twin(h);
            if h > t || !is_crossing(mesh, h) {
                continue;
            }
            let f = mesh.face_of(h);
            let g = mesh.face_of(t);
            let jump = ((self.theta[g.index()] - self.theta[f.index()] - self.kappa[h.index()]) / period).round() as i32;
            self.period_jump[h.index()] = jump;
            self.period_jump[t.index()] = -jump;
        }
    }

    /// Least-squares solve of `θ_g − θ_f = κ + (2π/N) p` over the free faces.
    fn solve_free_angles(&mut self, mesh: &HalfEdgeMesh, anchors: &[bool]) -> Result<()> {
        let mut free_index = vec![usize::MAX; mesh.num_faces()];
        let mut num_free = 0;
        for f in mesh.face_ids().filter(|f| !anchors[f.index()]) {
            free_index[f.index()] = num_free;
            num_free += 1;
        }
        if num_free == 0 {
            return Ok(());
        }

        let period = self.period();
        let mut triplets = Vec::new();
        let mut rhs = DVector::<f64>::zeros(num_free);
        for h in mesh.halfedge_ids() {
            let t = mesh.twin(h);
            if h > t || !is_crossing(mesh, h) {
                continue;
            }
            let (f, g) = (mesh.face_of(h).index(), mesh.face_of(t).index());
            let c = self.kappa[h.index()] + period * self.period_jump[h.index()] as f64;
            match (free_index[f], free_index[g]) {
                (usize::MAX, usize::MAX) => {}
                (i, usize::MAX) => {
                    triplets.push((i, i, 1.0));
                    rhs[i] += self.theta[g] - c;
                }
                (usize::MAX, j) => {
                    triplets.push((j, j, 1.0));
                    rhs[j] += self.theta[f] + c;
                }
                (i, j) => {
                    triplets.extend([(i, i, 1.0), (j, j, 1.0), (i, j, -1.0), (j, i, -1.0)]);
                    rhs[i] -= c;
                    rhs[j] += c;
                }
            }
        }
        let system = symmetric_from_triplets(num_free, &triplets);

        let cg = ConjugateGradientSolver {
            max_iterations: 0,
            tolerance: 1e-10,
        };
        let solution = match cg.factor_and_solve(&system, &rhs) {
            Ok(x) => x,
            Err(e) => {
                log::warn!("field solve with {} failed ({}), retrying with ldlt", cg.name(), e);
                LdltSolver.factor_and_solve(&system, &rhs)?
            }
        };

        for f in mesh.face_ids() {
            let i = free_index[f.index()];
            if i != usize::MAX {
                self.theta[f.index()] = solution[i];
            }
        }
        Ok(())
    }
}

/// Whether `h` separates two faces.
#[inline]
pub(super) fn is_crossing(mesh: &HalfEdgeMesh, h: HalfEdgeId) -> bool {
    !mesh.is_boundary_halfedge(h) && !mesh.is_boundary_halfedge(mesh.twin(h))
}

fn check_reindex(
    mesh: &HalfEdgeMesh,
    vtx_reindex: &[usize],
    faces: &[[usize; 3]],
    face_reindex: &[usize],
) -> Result<()> {
    if vtx_reindex.len() != mesh.num_vertices() {
        return Err(MeshError::size_mismatch("vertex reindex", mesh.num_vertices(), vtx_reindex.len()));
    }
    if face_reindex.len() != mesh.num_faces() {
        return Err(MeshError::size_mismatch("face reindex", mesh.num_faces(), face_reindex.len()));
    }
    if let Some(&c) = face_reindex.iter().find(|&&c| c >= faces.len()) {
        return Err(MeshError::InconsistentCut {
            details: format!("face reindex {} exceeds {} cut faces", c, faces.len()),
        });
    }
    Ok(())
}

/// Local index in the cut face of the corner where `h` starts.
fn local_corner(mesh: &HalfEdgeMesh, h: HalfEdgeId, vtx_reindex: &[usize], face: &[usize; 3]) -> Result<usize> {
    let vertex = vtx_reindex[mesh.origin(h).index()];
    face.iter().position(|&v| v == vertex).ok_or_else(|| MeshError::InconsistentCut {
        details: format!("cut face {:?} does not contain vertex {}", face, vertex),
    })
}
