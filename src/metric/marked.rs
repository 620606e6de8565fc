//! The marked Penner cone metric.
//!
//! Edge lengths are stored as logarithmic coordinates `x_e` with
//! `l_e = exp(x_e / s)`. Corner angles, cotangents, and their derivatives are
//! derived from the coordinates on demand; nothing derived is cached, so the
//! Newton line search can evaluate trial coordinates without mutating the
//! metric.

use std::f64::consts::PI;

use nalgebra::DVector;
use rayon::prelude::*;

use crate::error::{MeshError, Result};
use crate::mesh::{EdgeId, FaceId, HalfEdgeId, HalfEdgeMesh, VertexId};

/// Corner angles and cotangents indexed by half-edge.
///
/// `angle[h]` is the angle opposite `h` in its face. Boundary half-edges
/// carry zeros.
#[derive(Debug, Clone)]
pub struct CornerAngles {
    /// Angle opposite each half-edge.
    pub angle: Vec<f64>,
    /// Cotangent of that angle.
    pub cot: Vec<f64>,
}

/// Angles and cotangents of a triangle with side lengths `l`.
///
/// Angle `i` is opposite side `i`. Violations of the triangle inequality give
/// the degenerate limit: the angle opposite the longest side is π.
pub fn triangle_angles(l: [f64; 3]) -> ([f64; 3], [f64; 3]) {
    let mut sorted = l;
    sorted.sort_by(|a, b| b.total_cmp(a));
    let [a, b, c] = sorted;
    // Kahan's stable Heron formula
    let product = (a + (b + c)) * (c - (a - b)) * (c + (a - b)) * (a + (b - c));
    if !(product > 0.0) || !(c - (a - b) > 0.0) {
        let longest = (0..3).fold(0, |best, i| if l[i] > l[best] { i } else { best });
        let mut angles = [0.0; 3];
        angles[longest] = PI;
        return (angles, [0.0; 3]);
    }
    let four_area = product.sqrt();

    let mut angles = [0.0; 3];
    let mut cots = [0.0; 3];
    for i in 0..3 {
        let (lj, lk) = (l[(i + 1) % 3], l[(i + 2) % 3]);
        let numerator = lj * lj + lk * lk - l[i] * l[i];
        angles[i] = four_area.atan2(numerator);
        cots[i] = numerator / four_area;
    }
    (angles, cots)
}

/// Whether three lengths satisfy the strict triangle inequality.
#[inline]
pub fn is_valid_triangle(l: [f64; 3]) -> bool {
    l[0] < l[1] + l[2] && l[1] < l[2] + l[0] && l[2] < l[0] + l[1]
}

/// A loop in the dual mesh, stored as the half-edges it crosses.
///
/// Crossing `halfedges[i]` moves from `face(halfedges[i])` into the face of
/// its twin, which is the face of `halfedges[i + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DualLoop {
    /// Crossed half-edges, in order.
    pub halfedges: Vec<HalfEdgeId>,
    /// Target holonomy angle.
    pub target: f64,
}

impl DualLoop {
    /// Create a loop with a zero target.
    pub fn new(halfedges: Vec<HalfEdgeId>) -> Self {
        Self {
            halfedges,
            target: 0.0,
        }
    }

    /// Corner angle terms whose signed sum is the holonomy of the loop.
    ///
    /// Turning left through a face adds the corner at the shared vertex;
    /// turning right subtracts it.
    pub fn angle_terms(&self, mesh: &HalfEdgeMesh) -> Vec<(HalfEdgeId, f64)> {
        let k = self.halfedges.len();
        let mut terms = Vec::with_capacity(k);
        for i in 0..k {
            let entry = mesh.twin(self.halfedges[(i + k - 1) % k]);
            let exit = self.halfedges[i];
            if exit == mesh.next(entry) {
                terms.push((mesh.next(exit), 1.0));
            } else if exit == mesh.prev(entry) {
                terms.push((mesh.next(entry), -1.0));
            }
        }
        terms
    }

    /// Holonomy of the loop for the given corner angles.
    pub fn holonomy(&self, mesh: &HalfEdgeMesh, angles: &[f64]) -> f64 {
        self.angle_terms(mesh)
            .iter()
            .map(|&(h, sign)| sign * angles[h.index()])
            .sum()
    }

    /// Faces visited by the loop, in order.
    pub fn faces<'a>(&'a self, mesh: &'a HalfEdgeMesh) -> impl Iterator<Item = FaceId> + 'a {
        self.halfedges.iter().map(move |&h| mesh.face_of(h))
    }
}

/// A cone metric on a cut mesh with rotation form and holonomy marks.
#[derive(Debug, Clone)]
pub struct MarkedPennerConeMetric {
    mesh: HalfEdgeMesh,
    coords: DVector<f64>,
    scale: f64,
    th_hat: Vec<f64>,
    rotation_form: Vec<f64>,
    loops: Vec<DualLoop>,
    is_cut: Vec<bool>,
    is_hard: Vec<bool>,
}

impl MarkedPennerConeMetric {
    /// Create a metric on `mesh` with regular cone angles and no marks.
    ///
    /// Coordinates start from the embedding lengths, or from zero (the
    /// equilateral metric) when `use_initial_zero` is set.
    pub fn new(mesh: HalfEdgeMesh, scale: f64, use_initial_zero: bool) -> Self {
        let coords = if use_initial_zero {
            DVector::zeros(mesh.num_edges())
        } else {
            Self::embedding_coords(&mesh, scale)
        };
        let is_cut = mesh.edge_ids().map(|e| mesh.is_boundary_edge(e)).collect();
        Self {
            th_hat: vec![2.0 * PI; mesh.num_vertices()],
            rotation_form: vec![0.0; mesh.num_halfedges()],
            loops: Vec::new(),
            is_cut,
            is_hard: vec![false; mesh.num_vertices()],
            coords,
            scale,
            mesh,
        }
    }

    /// Logarithmic coordinates of the embedded edge lengths.
    pub fn embedding_coords(mesh: &HalfEdgeMesh, scale: f64) -> DVector<f64> {
        DVector::from_iterator(
            mesh.num_edges(),
            mesh.edge_ids()
                .map(|e| scale * mesh.edge_length(mesh.edge_halfedge(e)).ln()),
        )
    }

    // ==================== Accessors ====================

    /// The underlying cut mesh.
    #[inline]
    pub fn mesh(&self) -> &HalfEdgeMesh {
        &self.mesh
    }

    /// Current edge coordinates.
    #[inline]
    pub fn coords(&self) -> &DVector<f64> {
        &self.coords
    }

    /// Coordinate scale `s`: 1 for log lengths, 2 for Penner coordinates.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Target cone angle per vertex.
    #[inline]
    pub fn th_hat(&self) -> &[f64] {
        &self.th_hat
    }

    /// Rotation form per half-edge.
    #[inline]
    pub fn rotation_form(&self) -> &[f64] {
        &self.rotation_form
    }

    /// Homology basis loops with their holonomy targets.
    #[inline]
    pub fn loops(&self) -> &[DualLoop] {
        &self.loops
    }

    /// Whether an edge is cut (mesh boundary or field seam).
    #[inline]
    pub fn is_cut(&self, e: EdgeId) -> bool {
        self.is_cut[e.index()]
    }

    /// Per-edge cut flags.
    #[inline]
    pub fn cut_flags(&self) -> &[bool] {
        &self.is_cut
    }

    /// Whether a vertex lies on a hard feature.
    #[inline]
    pub fn is_hard(&self, v: VertexId) -> bool {
        self.is_hard[v.index()]
    }

    /// Length of an edge under the current coordinates.
    #[inline]
    pub fn length(&self, e: EdgeId) -> f64 {
        (self.coords[e.index()] / self.scale).exp()
    }

    // ==================== Mutation ====================

    /// Replace the coordinates.
    pub fn set_coords(&mut self, coords: DVector<f64>) -> Result<()> {
        if coords.len() != self.mesh.num_edges() {
            return Err(MeshError::size_mismatch("metric coordinates", self.mesh.num_edges(), coords.len()));
        }
        self.coords = coords;
        Ok(())
    }

    /// Replace the target cone angles.
    pub fn set_th_hat(&mut self, th_hat: Vec<f64>) -> Result<()> {
        if th_hat.len() != self.mesh.num_vertices() {
            return Err(MeshError::size_mismatch("cone angles", self.mesh.num_vertices(), th_hat.len()));
        }
        self.th_hat = th_hat;
        Ok(())
    }

    /// Replace the rotation form.
    pub fn set_rotation_form(&mut self, rotation_form: Vec<f64>) -> Result<()> {
        if rotation_form.len() != self.mesh.num_halfedges() {
            return Err(MeshError::size_mismatch(
                "rotation form",
                self.mesh.num_halfedges(),
                rotation_form.len(),
            ));
        }
        self.rotation_form = rotation_form;
        Ok(())
    }

    /// Replace the homology loops.
    pub fn set_loops(&mut self, loops: Vec<DualLoop>) {
        self.loops = loops;
    }

    /// Mark seam edges as cut in addition to the mesh boundary.
    pub fn set_seams(&mut self, is_seam: &[bool]) -> Result<()> {
        if is_seam.len() != self.mesh.num_edges() {
            return Err(MeshError::size_mismatch("seam flags", self.mesh.num_edges(), is_seam.len()));
        }
        for e in self.mesh.edge_ids() {
            self.is_cut[e.index()] = self.mesh.is_boundary_edge(e) || is_seam[e.index()];
        }
        Ok(())
    }

    /// Replace the hard-feature vertex flags.
    pub fn set_hard(&mut self, is_hard: Vec<bool>) -> Result<()> {
        if is_hard.len() != self.mesh.num_vertices() {
            return Err(MeshError::size_mismatch("hard vertex flags", self.mesh.num_vertices(), is_hard.len()));
        }
        self.is_hard = is_hard;
        Ok(())
    }

    // ==================== Geometry ====================

    /// Edge lengths for the given coordinates.
    pub fn lengths_at(&self, coords: &DVector<f64>) -> Vec<f64> {
        coords.iter().map(|x| (x / self.scale).exp()).collect()
    }

    fn face_lengths(&self, lengths: &[f64], f: FaceId) -> [f64; 3] {
        let [h0, h1, h2] = self.mesh.face_halfedges(f);
        [
            lengths[self.mesh.edge_of(h0).index()],
            lengths[self.mesh.edge_of(h1).index()],
            lengths[self.mesh.edge_of(h2).index()],
        ]
    }

    /// Corner angles under the current coordinates.
    pub fn corner_angles(&self) -> CornerAngles {
        self.corner_angles_at(&self.coords)
    }

    /// Corner angles for the given coordinates.
    pub fn corner_angles_at(&self, coords: &DVector<f64>) -> CornerAngles {
        let lengths = self.lengths_at(coords);
        let per_face: Vec<([f64; 3], [f64; 3])> = (0..self.mesh.num_faces())
            .into_par_iter()
            .map(|f| triangle_angles(self.face_lengths(&lengths, FaceId::new(f))))
            .collect();

        let mut angle = vec![0.0; self.mesh.num_halfedges()];
        let mut cot = vec![0.0; self.mesh.num_halfedges()];
        for (f, (a, c)) in per_face.iter().enumerate() {
            for (i, h) in self.mesh.face_halfedges(FaceId::new(f)).iter().enumerate() {
                angle[h.index()] = a[i];
                cot[h.index()] = c[i];
            }
        }
        CornerAngles { angle, cot }
    }

    /// Whether every face satisfies the triangle inequality for `coords`.
    pub fn is_valid_coords(&self, coords: &DVector<f64>) -> bool {
        let lengths = self.lengths_at(coords);
        (0..self.mesh.num_faces())
            .into_par_iter()
            .all(|f| is_valid_triangle(self.face_lengths(&lengths, FaceId::new(f))))
    }

    /// Partial derivatives of the three face angles with respect to the three
    /// edge coordinates of each face.
    ///
    /// `blocks[f][i][j]` is `∂α_i / ∂x_{e(h_j)}` for the half-edges `h_0, h_1,
    /// h_2` of face `f`.
    pub fn angle_derivatives(&self, angles: &CornerAngles) -> Vec<[[f64; 3]; 3]> {
        let s = self.scale;
        (0..self.mesh.num_faces())
            .into_par_iter()
            .map(|f| {
                let hs = self.mesh.face_halfedges(FaceId::new(f));
                let c = [
                    angles.cot[hs[0].index()],
                    angles.cot[hs[1].index()],
                    angles.cot[hs[2].index()],
                ];
                let mut block = [[0.0; 3]; 3];
                for i in 0..3 {
                    let (next, prev) = ((i + 1) % 3, (i + 2) % 3);
                    block[i][i] = (c[next] + c[prev]) / s;
                    block[i][next] = -c[prev] / s;
                    block[i][prev] = -c[next] / s;
                }
                block
            })
            .collect()
    }

    /// Half-edges whose opposite angles are the corners at `v`.
    pub fn vertex_corners(&self, v: VertexId) -> impl Iterator<Item = HalfEdgeId> + '_ {
        self.mesh
            .vertex_halfedges(v)
            .filter(move |&h| !self.mesh.is_boundary_halfedge(h))
            .map(move |h| self.mesh.next(h))
    }

    /// Sum of the corner angles at each vertex.
    pub fn vertex_angle_sums(&self, angles: &CornerAngles) -> Vec<f64> {
        self.mesh
            .vertex_ids()
            .map(|v| self.vertex_corners(v).map(|h| angles.angle[h.index()]).sum())
            .collect()
    }

    /// Largest vertex angle error over interior vertices.
    pub fn max_interior_angle_error(&self) -> f64 {
        let angles = self.corner_angles();
        let sums = self.vertex_angle_sums(&angles);
        self.mesh
            .vertex_ids()
            .filter(|&v| !self.mesh.is_boundary_vertex(v))
            .map(|v| (sums[v.index()] - self.th_hat[v.index()]).abs())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, shapes};
    use approx::assert_relative_eq;

    #[test]
    fn test_equilateral_angles() {
        let (angles, cots) = triangle_angles([1.0, 1.0, 1.0]);
        for i in 0..3 {
            assert_relative_eq!(angles[i], PI / 3.0, epsilon = 1e-14);
            assert_relative_eq!(cots[i], 1.0 / 3.0f64.sqrt(), epsilon = 1e-14);
        }
    }

    #[test]
    fn test_right_triangle_angles() {
        let (angles, _) = triangle_angles([5.0, 3.0, 4.0]);
        assert_relative_eq!(angles[0], PI / 2.0, epsilon = 1e-14);
        assert_relative_eq!(angles.iter().sum::<f64>(), PI, epsilon = 1e-14);
    }

    #[test]
    fn test_degenerate_triangle() {
        assert!(!is_valid_triangle([3.0, 1.0, 1.0]));
        let (angles, cots) = triangle_angles([3.0, 1.0, 1.0]);
        assert_eq!(angles, [PI, 0.0, 0.0]);
        assert_eq!(cots, [0.0; 3]);
    }

    #[test]
    fn test_octahedron_angle_sums() {
        let (vertices, faces) = shapes::octahedron();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let metric = MarkedPennerConeMetric::new(mesh, 2.0, false);

        let angles = metric.corner_angles();
        for sum in metric.vertex_angle_sums(&angles) {
            assert_relative_eq!(sum, 4.0 * PI / 3.0, epsilon = 1e-12);
        }
        for e in metric.mesh().edge_ids() {
            assert_relative_eq!(metric.length(e), 2.0f64.sqrt(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_angle_derivatives_match_finite_differences() {
        let (vertices, faces) = shapes::grid(2, 2, 1.0, 1.3);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let metric = MarkedPennerConeMetric::new(mesh, 2.0, false);
        let angles = metric.corner_angles();
        let blocks = metric.angle_derivatives(&angles);

        let f = FaceId::new(3);
        let hs = metric.mesh().face_halfedges(f);
        let delta = 1e-6;
        for j in 0..3 {
            let mut coords = metric.coords().clone();
            coords[metric.mesh().edge_of(hs[j]).index()] += delta;
            let perturbed = metric.corner_angles_at(&coords);
            for i in 0..3 {
                let fd = (perturbed.angle[hs[i].index()] - angles.angle[hs[i].index()]) / delta;
                assert_relative_eq!(blocks[f.index()][i][j], fd, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_vertex_loop_holonomy_is_angle_sum() {
        let (vertices, faces) = shapes::octahedron();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let metric = MarkedPennerConeMetric::new(mesh, 1.0, false);
        let angles = metric.corner_angles();

        let apex = VertexId::new(4);
        let halfedges: Vec<_> = metric.mesh().vertex_halfedges(apex).collect();
        let dual_loop = DualLoop::new(halfedges);
        assert_relative_eq!(
            dual_loop.holonomy(metric.mesh(), &angles.angle),
            4.0 * PI / 3.0,
            epsilon = 1e-12
        );
    }
}
