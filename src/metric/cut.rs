//! Building a marked metric from a feature cut mesh and a frame field.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};

use super::homology::{field_seams, homology_loops};
use super::marked::{DualLoop, MarkedPennerConeMetric};
use super::MarkedMetricParameters;
use crate::error::{MeshError, Result};
use crate::feature::VertexEdge;
use crate::field::{FieldDirections, FrameField, IntrinsicNRosyField};
use crate::mesh::{build_from_triangles, Components, HalfEdgeMesh, VertexId};

/// Tolerance for treating a target angle as a cone.
const CONE_TOLERANCE: f64 = 1e-8;

/// A marked metric on the union of feature cuts and field seams.
#[derive(Debug, Clone)]
pub struct UnionMetric {
    /// The metric, ready for optimization.
    pub metric: MarkedPennerConeMetric,
    /// Cut-mesh vertex of each metric vertex; interior vertices come first.
    pub vtx_reindex: Vec<usize>,
    /// Cut-mesh face of each metric face.
    pub face_reindex: Vec<usize>,
    /// Rotation form per metric half-edge.
    pub rotation_form: Vec<f64>,
    /// Target cone angle per metric vertex.
    pub th_hat: Vec<f64>,
    /// Field angle per metric face.
    pub theta: Vec<f64>,
}

/// Derives fields, cones, seams, and homology marks on a feature cut mesh.
#[derive(Debug, Clone)]
pub struct CutMetricGenerator {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[usize; 3]>,
    params: MarkedMetricParameters,
    vtx_reindex: Vec<usize>,
    face_reindex: Vec<usize>,
    /// Metric mesh with embedding lengths, used for field computations.
    embedding: MarkedPennerConeMetric,
    is_hard: Vec<bool>,
    field: IntrinsicNRosyField,
    has_field: bool,
}

impl CutMetricGenerator {
    /// Prepare the metric mesh for a cut mesh.
    ///
    /// `hard_feature_edges` are given in cut-mesh vertex indices.
    pub fn new(
        vertices_cut: &[Point3<f64>],
        faces_cut: &[[usize; 3]],
        params: MarkedMetricParameters,
        hard_feature_edges: &[VertexEdge],
    ) -> Result<Self> {
        let cut_mesh = build_from_triangles(vertices_cut, faces_cut)?;
        let (interior, boundary): (Vec<VertexId>, Vec<VertexId>) =
            cut_mesh.vertex_ids().partition(|&v| !cut_mesh.is_boundary_vertex(v));
        let vtx_reindex: Vec<usize> = interior.into_iter().chain(boundary).map(|v| v.index()).collect();

        let mut inverse = vec![0usize; vtx_reindex.len()];
        for (i, &c) in vtx_reindex.iter().enumerate() {
            inverse[c] = i;
        }
        let union_vertices: Vec<Point3<f64>> = vtx_reindex.iter().map(|&c| vertices_cut[c]).collect();
        let union_faces: Vec<[usize; 3]> = faces_cut.iter().map(|f| f.map(|c| inverse[c])).collect();
        let mesh = build_from_triangles(&union_vertices, &union_faces)?;

        let mut is_hard = vec![false; mesh.num_vertices()];
        for edge in hard_feature_edges {
            if edge.v0 >= inverse.len() || edge.v1 >= inverse.len() {
                return Err(MeshError::InvalidFeatureEdge {
                    v0: edge.v0,
                    v1: edge.v1,
                });
            }
            is_hard[inverse[edge.v0]] = true;
            is_hard[inverse[edge.v1]] = true;
        }

        log::debug!(
            "cut metric mesh: {} vertices ({} interior), {} faces",
            mesh.num_vertices(),
            mesh.vertex_ids().filter(|&v| !mesh.is_boundary_vertex(v)).count(),
            mesh.num_faces()
        );

        Ok(Self {
            vertices: vertices_cut.to_vec(),
            faces: faces_cut.to_vec(),
            params,
            vtx_reindex,
            face_reindex: (0..faces_cut.len()).collect(),
            embedding: MarkedPennerConeMetric::new(mesh, params.scale(), false),
            is_hard,
            field: IntrinsicNRosyField::default(),
            has_field: false,
        })
    }

    /// The metric mesh with embedding lengths.
    pub fn embedding(&self) -> &MarkedPennerConeMetric {
        &self.embedding
    }

    /// The current field on the metric mesh.
    pub fn field(&self) -> &IntrinsicNRosyField {
        &self.field
    }

    /// Parameters given at construction.
    pub fn params(&self) -> &MarkedMetricParameters {
        &self.params
    }

    fn check_cut_faces(&self, faces_cut: &[[usize; 3]]) -> Result<()> {
        if faces_cut != self.faces.as_slice() {
            return Err(MeshError::InconsistentCut {
                details: "faces differ from the cut mesh the generator was built on".to_string(),
            });
        }
        Ok(())
    }

    /// Generate the field from per-face directions on the cut mesh.
    pub fn generate_fields(
        &mut self,
        vertices_cut: &[Point3<f64>],
        faces_cut: &[[usize; 3]],
        vertex_map: &[usize],
        direction: &[Vector3<f64>],
        is_fixed: &[bool],
    ) -> Result<()> {
        self.check_cut_faces(faces_cut)?;
        if vertices_cut.len() != self.vertices.len() {
            return Err(MeshError::size_mismatch("cut vertices", self.vertices.len(), vertices_cut.len()));
        }
        if vertex_map.len() != vertices_cut.len() {
            return Err(MeshError::size_mismatch("cut vertex map", vertices_cut.len(), vertex_map.len()));
        }

        if direction.len() != faces_cut.len() {
            return Err(MeshError::size_mismatch("field directions", faces_cut.len(), direction.len()));
        }
        if is_fixed.len() != faces_cut.len() {
            return Err(MeshError::size_mismatch("fixed face flags", faces_cut.len(), is_fixed.len()));
        }

        let directions = FieldDirections {
            direction: self.face_reindex.iter().map(|&c| direction[c]).collect(),
            is_fixed: self.face_reindex.iter().map(|&c| is_fixed[c]).collect(),
        };
        self.field.generate(&self.embedding, &directions)?;
        self.has_field = true;
        Ok(())
    }

    /// Load a persisted field given per cut face.
    pub fn set_fields(
        &mut self,
        faces_cut: &[[usize; 3]],
        reference_field: &[Vector3<f64>],
        theta: &[f64],
        kappa: &[[f64; 3]],
        period_jump: &[[i32; 3]],
    ) -> Result<()> {
        self.check_cut_faces(faces_cut)?;
        if reference_field.len() != faces_cut.len() {
            return Err(MeshError::size_mismatch(
                "field reference directions",
                faces_cut.len(),
                reference_field.len(),
            ));
        }
        self.field.set_field(
            &self.embedding,
            &self.vtx_reindex,
            faces_cut,
            &self.face_reindex,
            theta,
            kappa,
            period_jump,
        )?;
        self.has_field = true;
        Ok(())
    }

    /// The field in persisted form, per cut face.
    pub fn get_field(&self) -> Result<FrameField> {
        self.require_field()?;
        let angles = self
            .field
            .get_field(&self.embedding, &self.vtx_reindex, &self.faces, &self.face_reindex)?;
        let reference_field = self
            .faces
            .iter()
            .map(|f| {
                (self.vertices[f[1]] - self.vertices[f[0]])
                    .try_normalize(0.0)
                    .unwrap_or_else(Vector3::x)
            })
            .collect();
        Ok(FrameField {
            reference_field,
            theta: angles.theta,
            kappa: angles.kappa,
            period_jump: angles.period_jump,
        })
    }

    /// Cancel cone pairs within `max_distance`, or adjacent pairs for `None`.
    pub fn collapse_cones(&mut self, max_distance: Option<f64>) -> Result<usize> {
        self.require_field()?;
        match max_distance {
            Some(distance) => self.field.collapse_nearby_cones(&self.embedding, distance),
            None => self.field.collapse_adjacent_cones(&self.embedding),
        }
    }

    /// Cone index per cut-mesh vertex.
    pub fn cone_indices(&self) -> Result<Vec<i32>> {
        self.require_field()?;
        let indices = self.field.cone_indices(&self.embedding);
        let mut per_cut = vec![0; indices.len()];
        for (i, &c) in self.vtx_reindex.iter().enumerate() {
            per_cut[c] = indices[i];
        }
        Ok(per_cut)
    }

    fn require_field(&self) -> Result<()> {
        if self.has_field {
            Ok(())
        } else {
            Err(MeshError::InvalidState("no frame field has been generated or loaded".to_string()))
        }
    }

    /// Build the marked metric: cone angles, rotation form, seams, and loops.
    pub fn get_union_metric(&self, params: &MarkedMetricParameters) -> Result<UnionMetric> {
        self.require_field()?;
        let mesh = self.embedding.mesh();
        let period = self.field.period();

        let th_hat = self.field.cone_angles(&self.embedding);
        let rotation_form = self.field.rotation_form(&self.embedding);
        let is_cone: Vec<bool> = mesh
            .vertex_ids()
            .map(|v| !mesh.is_boundary_vertex(v) && (th_hat[v.index()] - 2.0 * PI).abs() > CONE_TOLERANCE)
            .collect();
        let seams = field_seams(mesh, &is_cone);

        let trivial_torus = trivial_tori(mesh, &is_cone);
        let angles = self.embedding.corner_angles();
        let loops: Vec<DualLoop> = homology_loops(mesh)
            .into_iter()
            .map(|halfedges| {
                let mut dual_loop = DualLoop::new(halfedges);
                let rotation: f64 = dual_loop.halfedges.iter().map(|h| rotation_form[h.index()]).sum();
                let raw = dual_loop.holonomy(mesh, &angles.angle) + rotation;
                let component = trivial_torus.0[mesh.face_of(dual_loop.halfedges[0]).index()];
                let step = if params.remove_trivial_torus && trivial_torus.1[component] {
                    2.0 * PI
                } else {
                    period
                };
                dual_loop.target = step * (raw / step).round();
                dual_loop
            })
            .collect();

        let mut metric = MarkedPennerConeMetric::new(mesh.clone(), params.scale(), params.use_initial_zero);
        metric.set_th_hat(th_hat.clone())?;
        metric.set_rotation_form(rotation_form.clone())?;
        metric.set_seams(&seams)?;
        metric.set_hard(self.is_hard.clone())?;
        log::info!(
            "union metric: {} cones, {} seam edges, {} homology loops",
            is_cone.iter().filter(|c| **c).count(),
            seams.iter().filter(|s| **s).count(),
            loops.len()
        );
        metric.set_loops(loops);

        Ok(UnionMetric {
            metric,
            vtx_reindex: self.vtx_reindex.clone(),
            face_reindex: self.face_reindex.clone(),
            rotation_form,
            th_hat,
            theta: self.field.theta().to_vec(),
        })
    }
}

/// Per-face component labels, and whether each component is a closed
/// genus-one surface without cones.
fn trivial_tori(mesh: &HalfEdgeMesh, is_cone: &[bool]) -> (Vec<usize>, Vec<bool>) {
    let components = Components::new(mesh);
    let mut euler = vec![0i64; components.count];
    let mut closed = vec![true; components.count];
    let mut cone_free = vec![true; components.count];

    for v in mesh.vertex_ids() {
        let c = components.vertex_component[v.index()];
        euler[c] += 1;
        closed[c] &= !mesh.is_boundary_vertex(v);
        cone_free[c] &= !is_cone[v.index()];
    }
    for e in mesh.edge_ids() {
        let h = mesh.edge_halfedge(e);
        let f = if mesh.is_boundary_halfedge(h) {
            mesh.face_of(mesh.twin(h))
        } else {
            mesh.face_of(h)
        };
        euler[components.face_component[f.index()]] -= 1;
    }
    for &c in &components.face_component {
        euler[c] += 1;
    }

    let is_trivial = (0..components.count)
        .map(|c| euler[c] == 0 && closed[c] && cone_free[c])
        .collect();
    (components.face_component, is_trivial)
}
