//! Sharp feature detection, chord refinement, and feature cuts.
//!
//! Feature edges become boundary edges of a cut mesh so that the
//! parameterization can align them with the UV axes. Before cutting, edges
//! that would join two feature vertices across a face are split, since after
//! cutting they would leave triangles with every corner on the boundary.

mod finder;
mod refine;

pub use finder::FeatureFinder;
pub use refine::{generate_refined_feature_mesh, refine_feature_chords};

use std::collections::BTreeSet;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// An undirected edge given by its two vertex indices, stored in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexEdge {
    /// Smaller vertex index.
    pub v0: usize,
    /// Larger vertex index.
    pub v1: usize,
}

impl VertexEdge {
    /// Create an edge, ordering the endpoints.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            v0: a.min(b),
            v1: a.max(b),
        }
    }
}

impl From<[usize; 2]> for VertexEdge {
    fn from([a, b]: [usize; 2]) -> Self {
        Self::new(a, b)
    }
}

/// Soft and hard feature edges of a mesh.
///
/// Hard features are a subset of the features; their boundary vertices keep
/// angle constraints in relaxed optimization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureEdges {
    /// All feature edges.
    pub features: Vec<VertexEdge>,
    /// Hard feature edges.
    pub hard: Vec<VertexEdge>,
}

impl FeatureEdges {
    /// Whether there are no features.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Options for automatic feature detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOptions {
    /// Dihedral angle in degrees above which an edge is a feature.
    pub feature_angle: f64,
    /// Dihedral angle in degrees above which a feature is hard.
    pub hard_feature_angle: f64,
    /// Feature chains with fewer edges are dropped unless they touch the boundary.
    pub min_feature_length: usize,
    /// Split chords between feature vertices.
    pub refine: bool,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            feature_angle: 40.0,
            hard_feature_angle: 80.0,
            min_feature_length: 2,
            refine: true,
        }
    }
}

impl FeatureOptions {
    /// Set the soft feature angle in degrees.
    pub fn with_feature_angle(mut self, degrees: f64) -> Self {
        self.feature_angle = degrees;
        self
    }

    /// Set the hard feature angle in degrees.
    pub fn with_hard_feature_angle(mut self, degrees: f64) -> Self {
        self.hard_feature_angle = degrees;
        self
    }

    /// Set the minimum feature chain length.
    pub fn with_min_feature_length(mut self, edges: usize) -> Self {
        self.min_feature_length = edges;
        self
    }

    /// Set whether to split chords.
    pub fn with_refine(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }
}

/// A mesh cut open along its feature edges.
///
/// Faces keep the input order and corner order; only vertex indices change.
#[derive(Debug, Clone)]
pub struct FeatureCutMesh {
    /// Cut vertex positions.
    pub vertices: Vec<Point3<f64>>,
    /// Faces in cut vertex indices.
    pub faces: Vec<[usize; 3]>,
    /// Input vertex of each cut vertex.
    pub vertex_map: Vec<usize>,
    /// Whether each face local edge is a feature.
    pub face_is_feature: Vec<[bool; 3]>,
}

impl FeatureCutMesh {
    /// Map input-indexed edges to every cut-mesh copy of them.
    pub fn map_edges(&self, edges: &[VertexEdge]) -> Vec<VertexEdge> {
        let wanted: BTreeSet<VertexEdge> = edges.iter().copied().collect();
        let mut mapped = BTreeSet::new();
        for face in &self.faces {
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                if wanted.contains(&VertexEdge::new(self.vertex_map[a], self.vertex_map[b])) {
                    mapped.insert(VertexEdge::new(a, b));
                }
            }
        }
        mapped.into_iter().collect()
    }
}

/// A mesh with detected features and chords split.
#[derive(Debug, Clone)]
pub struct RefinedFeatureMesh {
    /// Vertex positions; inserted vertices follow the input ones.
    pub vertices: Vec<Point3<f64>>,
    /// Refined faces.
    pub faces: Vec<[usize; 3]>,
    /// Feature edges.
    pub feature_edges: Vec<VertexEdge>,
    /// Hard feature edges.
    pub hard_feature_edges: Vec<VertexEdge>,
    /// Input face of each refined face.
    pub face_parents: Vec<usize>,
    /// For inserted vertices, the two input vertices they split.
    pub endpoints: Vec<Option<[usize; 2]>>,
}

impl RefinedFeatureMesh {
    /// The soft and hard features together.
    pub fn feature_edges(&self) -> FeatureEdges {
        FeatureEdges {
            features: self.feature_edges.clone(),
            hard: self.hard_feature_edges.clone(),
        }
    }

    /// Number of vertices inserted by refinement.
    pub fn num_inserted(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_edge_is_unordered() {
        assert_eq!(VertexEdge::new(4, 1), VertexEdge::new(1, 4));
        assert_eq!(VertexEdge::from([7, 2]), VertexEdge { v0: 2, v1: 7 });
    }

    #[test]
    fn test_feature_options_builder() {
        let options = FeatureOptions::default().with_feature_angle(30.0).with_refine(false);
        assert_eq!(options.feature_angle, 30.0);
        assert_eq!(options.hard_feature_angle, 80.0);
        assert!(!options.refine);
    }
}
