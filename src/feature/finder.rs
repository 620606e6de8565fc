//! Marking feature edges and cutting along them.

use std::collections::HashMap;

use nalgebra::Point3;

use super::{FeatureCutMesh, VertexEdge};
use crate::error::{MeshError, Result};
use crate::mesh::{build_from_triangles, EdgeId, FaceId, HalfEdgeMesh, UnionFind};

/// Unsigned dihedral angle across an interior edge, in radians.
pub(super) fn dihedral_angle(mesh: &HalfEdgeMesh, e: EdgeId) -> f64 {
    let h = mesh.edge_halfedge(e);
    let nf = mesh.face_normal(mesh.face_of(h));
    let ng = mesh.face_normal(mesh.face_of(mesh.twin(h)));
    nf.cross(&ng).norm().atan2(nf.dot(&ng))
}

/// Marks feature edges on a mesh and produces the feature cut mesh.
#[derive(Debug, Clone)]
pub struct FeatureFinder {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[usize; 3]>,
    mesh: HalfEdgeMesh,
    edge_lookup: HashMap<VertexEdge, EdgeId>,
    is_feature: Vec<bool>,
}

impl FeatureFinder {
    /// Build the adjacency of a mesh with no features marked.
    pub fn new(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Result<Self> {
        let mesh = build_from_triangles(vertices, faces)?;
        let edge_lookup = mesh
            .edge_ids()
            .map(|e| {
                let h = mesh.edge_halfedge(e);
                (VertexEdge::new(mesh.origin(h).index(), mesh.dest(h).index()), e)
            })
            .collect();
        Ok(Self {
            vertices: vertices.to_vec(),
            faces: faces.to_vec(),
            is_feature: vec![false; mesh.num_edges()],
            edge_lookup,
            mesh,
        })
    }

    /// The input mesh.
    pub fn mesh(&self) -> &HalfEdgeMesh {
        &self.mesh
    }

    /// Look up the edge joining two vertices.
    pub fn find_edge(&self, edge: VertexEdge) -> Option<EdgeId> {
        self.edge_lookup.get(&edge).copied()
    }

    /// Whether an edge is marked.
    pub fn is_feature(&self, e: EdgeId) -> bool {
        self.is_feature[e.index()]
    }

    /// Number of marked edges.
    pub fn num_features(&self) -> usize {
        self.is_feature.iter().filter(|f| **f).count()
    }

    /// Mark the given edges as features.
    pub fn mark_features(&mut self, edges: &[VertexEdge]) -> Result<()> {
        for &edge in edges {
            let e = self.find_edge(edge).ok_or(MeshError::InvalidFeatureEdge {
                v0: edge.v0,
                v1: edge.v1,
            })?;
            self.is_feature[e.index()] = true;
        }
        Ok(())
    }

    /// Mark every edge sharper than `angle_degrees`, and every boundary edge.
    pub fn mark_dihedral_angle_features(&mut self, angle_degrees: f64) {
        let threshold = angle_degrees.to_radians();
        for e in self.mesh.edge_ids() {
            if self.mesh.is_boundary_edge(e) || dihedral_angle(&self.mesh, e) > threshold {
                self.is_feature[e.index()] = true;
            }
        }
        log::debug!("marked {} feature edges above {} degrees", self.num_features(), angle_degrees);
    }

    /// Unmark connected feature components with fewer than `min_length`
    /// edges, unless they contain a boundary edge.
    pub fn prune_small_features(&mut self, min_length: usize) {
        let mut components = UnionFind::new(self.mesh.num_vertices());
        for e in self.mesh.edge_ids().filter(|&e| self.is_feature(e)) {
            let h = self.mesh.edge_halfedge(e);
            components.union(self.mesh.origin(h).index(), self.mesh.dest(h).index());
        }

        let mut size: HashMap<usize, usize> = HashMap::new();
        let mut touches_boundary: HashMap<usize, bool> = HashMap::new();
        let mut root_of = vec![0usize; self.mesh.num_edges()];
        for e in self.mesh.edge_ids().filter(|&e| self.is_feature(e)) {
            let root = components.find(self.mesh.origin(self.mesh.edge_halfedge(e)).index());
            root_of[e.index()] = root;
            *size.entry(root).or_default() += 1;
            *touches_boundary.entry(root).or_default() |= self.mesh.is_boundary_edge(e);
        }

        let mut pruned = 0;
        for e in self.mesh.edge_ids() {
            if !self.is_feature(e) {
                continue;
            }
            let root = root_of[e.index()];
            if size[&root] < min_length && !touches_boundary[&root] {
                self.is_feature[e.index()] = false;
                pruned += 1;
            }
        }
        if pruned > 0 {
            log::debug!("pruned {} edges from short feature chains", pruned);
        }
    }

    /// The marked edges, in edge order.
    pub fn feature_edges(&self) -> Vec<VertexEdge> {
        self.mesh
            .edge_ids()
            .filter(|&e| self.is_feature(e))
            .map(|e| {
                let h = self.mesh.edge_halfedge(e);
                VertexEdge::new(self.mesh.origin(h).index(), self.mesh.dest(h).index())
            })
            .collect()
    }

    /// Feature flags per face local edge.
    pub fn face_is_feature(&self) -> Vec<[bool; 3]> {
        self.mesh
            .face_ids()
            .map(|f| self.mesh.face_halfedges(f).map(|h| self.is_feature(self.mesh.edge_of(h))))
            .collect()
    }

    /// Cut the mesh open along every feature edge.
    ///
    /// Corners are merged across non-feature interior edges; each merged
    /// class becomes one cut vertex, numbered by first appearance in face
    /// order.
    pub fn generate_feature_cut_mesh(&self) -> Result<FeatureCutMesh> {
        let mesh = &self.mesh;
        let num_corners = 3 * mesh.num_faces();
        let mut corners = UnionFind::new(num_corners);
        for h in mesh.halfedge_ids() {
            let t = mesh.twin(h);
            if h > t || mesh.is_boundary_halfedge(h) || mesh.is_boundary_halfedge(t) {
                continue;
            }
            if self.is_feature(mesh.edge_of(h)) {
                continue;
            }
            // interior half-edge 3f + i starts at corner i of face f
            corners.union(h.index(), mesh.next(t).index());
            corners.union(mesh.next(h).index(), t.index());
        }

        let (labels, count) = corners.labels();
        let mut vertex_map = vec![0usize; count];
        let mut faces = Vec::with_capacity(self.faces.len());
        for (f, face) in self.faces.iter().enumerate() {
            let mut cut_face = [0usize; 3];
            for i in 0..3 {
                let class = labels[3 * f + i];
                vertex_map[class] = face[i];
                cut_face[i] = class;
            }
            faces.push(cut_face);
        }
        let vertices: Vec<Point3<f64>> = vertex_map.iter().map(|&v| self.vertices[v]).collect();
        let face_is_feature = self.face_is_feature();

        let cut = build_from_triangles(&vertices, &faces).map_err(|e| MeshError::Feature {
            details: format!("feature cut is not manifold: {}", e),
        })?;
        for (f, flags) in face_is_feature.iter().enumerate() {
            for i in 0..3 {
                if flags[i] && !cut.is_boundary_edge(cut.edge_of(cut.face_halfedge(FaceId::new(f), i))) {
                    return Err(MeshError::InconsistentCut {
                        details: format!(
                            "feature edge ({}, {}) is not on the cut boundary",
                            self.faces[f][i],
                            self.faces[f][(i + 1) % 3]
                        ),
                    });
                }
            }
        }

        log::info!(
            "cut {} feature edges: {} vertices became {}",
            self.num_features(),
            self.vertices.len(),
            count
        );
        Ok(FeatureCutMesh {
            vertices,
            faces,
            vertex_map,
            face_is_feature,
        })
    }
}
