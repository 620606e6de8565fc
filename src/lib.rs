//! # Penner
//!
//! Seamless, feature-aligned UV parameterization of triangle meshes by
//! optimizing a marked Penner cone metric.
//!
//! The pipeline cuts the input along sharp features, fits an intrinsic
//! 4-RoSy cross field on the cut mesh, derives target cone angles and
//! holonomy constraints from that field, and then runs a constrained Newton
//! solve over logarithmic edge lengths until the metric is flat away from the
//! cones. The converged metric is laid out in the plane to produce per-corner
//! UV coordinates.
//!
//! ## Features
//!
//! - **Half-edge mesh** with an explicit edge table and deterministic numbering
//! - **Feature detection**: dihedral-angle features, chord refinement, feature cuts
//! - **Intrinsic cross fields**: curvature-aligned directions, period jumps, cone collapsing
//! - **Marked metrics**: vertex angle and loop holonomy constraints in Penner coordinates
//! - **Newton optimizer**: pluggable sparse solvers, line search, checkpoint/resume
//! - **Layout**: metric integration into seamless UV coordinates and diagnostics
//!
//! ## Quick Start
//!
//! ```no_run
//! use penner::prelude::*;
//!
//! let obj = penner::io::obj::load("fandisk.obj").unwrap();
//! let refined = generate_refined_feature_mesh(&obj.vertices, &obj.faces, &FeatureOptions::default()).unwrap();
//! let features = refined.feature_edges();
//!
//! let field = penner::session::generate_frame_field(
//!     &refined.vertices,
//!     &refined.faces,
//!     &features,
//!     &FieldOptions::default(),
//! )
//! .unwrap();
//!
//! let mut optimizer = MarkedMetricOptimizer::new(
//!     &refined.vertices,
//!     &refined.faces,
//!     &features,
//!     field,
//!     MarkedMetricParameters::default(),
//! )
//! .unwrap();
//!
//! let report = optimizer.optimize_relaxed(&NewtonParameters::default()).unwrap();
//! println!("newton: {:?} after {} iterations", report.status, report.iterations);
//!
//! optimizer.parameterize(false).unwrap();
//! let param = optimizer.get_parameterization().unwrap();
//! println!("{} uv vertices", param.uv.len());
//! ```
//!
//! ## Building Meshes Programmatically
//!
//! ```
//! use penner::prelude::*;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//!     Point3::new(0.5, 0.5, 1.0),
//! ];
//!
//! let faces = vec![
//!     [0, 2, 1],  // bottom
//!     [0, 1, 3],  // front
//!     [1, 2, 3],  // right
//!     [2, 0, 3],  // left
//! ];
//!
//! let mesh = build_from_triangles(&vertices, &faces).unwrap();
//! assert_eq!(mesh.num_vertices(), 4);
//! assert_eq!(mesh.num_edges(), 6);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod feature;
pub mod field;
pub mod io;
pub mod layout;
pub mod linalg;
pub mod mesh;
pub mod metric;
pub mod optimize;
pub mod session;

/// Prelude module for convenient imports.
///
/// ```
/// use penner::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{MeshError, Result};
    pub use crate::feature::{
        generate_refined_feature_mesh, FeatureCutMesh, FeatureEdges, FeatureFinder,
        FeatureOptions, RefinedFeatureMesh, VertexEdge,
    };
    pub use crate::field::{FieldDirections, FieldOptions, FrameField, IntrinsicNRosyField};
    pub use crate::layout::Parameterization;
    pub use crate::mesh::{
        build_from_triangles, to_face_vertex, EdgeId, FaceId, HalfEdgeId, HalfEdgeMesh,
        VertexId,
    };
    pub use crate::metric::{CutMetricGenerator, MarkedMetricParameters, MarkedPennerConeMetric};
    pub use crate::optimize::{
        MarkedMetricOptimizer, NewtonParameters, NewtonReport, NewtonStatus, OptimizerState,
    };
    pub use crate::session::{Command, CommandOutcome, Session};
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];

        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];

        let mesh = build_from_triangles(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 4);
        // closed: every half-edge belongs to a face
        assert_eq!(mesh.num_halfedges(), 12);
        assert!(mesh.is_valid());

        for v in mesh.vertex_ids() {
            assert!(!mesh.is_boundary_vertex(v), "vertex {:?} should not be on boundary", v);
        }
    }
}
