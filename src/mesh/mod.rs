//! Core mesh data structures.
//!
//! This module provides the half-edge mesh representation used by every
//! stage of the pipeline, together with connectivity helpers.
//!
//! # Overview
//!
//! The primary type is [`HalfEdgeMesh`], which represents a manifold triangle
//! mesh with boundary using a half-edge data structure plus an explicit edge
//! table. Metric coordinates live on edges and corner angles on half-edges,
//! so both index spaces are dense and stable.
//!
//! # Index Types
//!
//! Mesh elements are identified by type-safe index wrappers:
//! - [`VertexId`] - Identifies a vertex
//! - [`HalfEdgeId`] - Identifies a half-edge
//! - [`FaceId`] - Identifies a face
//! - [`EdgeId`] - Identifies a full edge
//!
//! # Construction
//!
//! ```
//! use penner::mesh::build_from_triangles;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2]];
//!
//! let mesh = build_from_triangles(&vertices, &faces).unwrap();
//! assert_eq!(mesh.num_boundary_loops(), 1);
//! ```

mod builder;
mod halfedge;
mod index;
pub mod shapes;
mod topology;

pub use builder::{build_from_triangles, to_face_vertex};
pub use halfedge::{Face, HalfEdge, HalfEdgeMesh, Vertex, VertexHalfEdgeIter};
pub use index::{EdgeId, FaceId, HalfEdgeId, VertexId};
pub use topology::{Components, UnionFind};
