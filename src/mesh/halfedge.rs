//! Half-edge mesh data structure.
//!
//! A half-edge (doubly-connected edge list) representation for triangle
//! meshes with an explicit edge table. The metric code stores one scalar per
//! edge and one per half-edge, so both index spaces are first class here.
//!
//! # Boundary Handling
//!
//! Boundary half-edges (on mesh boundaries and along cuts) have an invalid
//! face ID. Their twins are interior half-edges. Boundary loops can be
//! traversed using the `next` pointer on boundary half-edges.
//!
//! # Face Layout
//!
//! Meshes built by [`build_from_triangles`](super::build_from_triangles) store
//! the three interior half-edges of face `f` at indices `3f`, `3f + 1`,
//! `3f + 2`; half-edge `3f + i` runs from corner `i` to corner `i + 1` of the
//! input triangle. Boundary half-edges follow all interior ones.

use nalgebra::{Point3, Vector3};

use super::index::{EdgeId, FaceId, HalfEdgeId, VertexId};

/// A vertex in the half-edge mesh.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// The 3D position of this vertex.
    pub position: Point3<f64>,

    /// One outgoing half-edge from this vertex.
    /// For boundary vertices, this is guaranteed to be a boundary half-edge.
    pub halfedge: HalfEdgeId,
}

impl Vertex {
    /// Create a new vertex at the given position.
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            halfedge: HalfEdgeId::invalid(),
        }
    }
}

/// A half-edge in the mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfEdge {
    /// The vertex this half-edge originates from.
    pub origin: VertexId,

    /// The opposite half-edge (pointing in the reverse direction).
    pub twin: HalfEdgeId,

    /// The next half-edge around the face (counter-clockwise).
    pub next: HalfEdgeId,

    /// The previous half-edge around the face.
    pub prev: HalfEdgeId,

    /// The face this half-edge belongs to. Invalid for boundary half-edges.
    pub face: FaceId,

    /// The undirected edge this half-edge belongs to.
    pub edge: EdgeId,
}

impl HalfEdge {
    /// Check if this half-edge is on the boundary.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        !self.face.is_valid()
    }
}

/// A face in the half-edge mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct Face {
    /// The reference half-edge of this face (local edge 0).
    pub halfedge: HalfEdgeId,
}

/// A half-edge mesh data structure for triangle meshes.
#[derive(Debug, Clone, Default)]
pub struct HalfEdgeMesh {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) halfedges: Vec<HalfEdge>,
    pub(crate) faces: Vec<Face>,
    /// One representative (interior if possible) half-edge per edge.
    pub(crate) edges: Vec<HalfEdgeId>,
}

impl HalfEdgeMesh {
    // ==================== Accessors ====================

    /// Get the number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of half-edges, including boundary half-edges.
    #[inline]
    pub fn num_halfedges(&self) -> usize {
        self.halfedges.len()
    }

    /// Get the number of faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Get the number of undirected edges.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Get a vertex by ID.
    #[inline]
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    /// Get a half-edge by ID.
    #[inline]
    pub fn halfedge(&self, id: HalfEdgeId) -> &HalfEdge {
        &self.halfedges[id.index()]
    }

    /// Get a face by ID.
    #[inline]
    pub fn face(&self, id: FaceId) -> &Face {
        &self.faces[id.index()]
    }

    /// Get the position of a vertex.
    #[inline]
    pub fn position(&self, v: VertexId) -> &Point3<f64> {
        &self.vertex(v).position
    }

    // ==================== Topology Queries ====================

    /// Get the twin (opposite) half-edge.
    #[inline]
    pub fn twin(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.halfedge(he).twin
    }

    /// Get the next half-edge around the face.
    #[inline]
    pub fn next(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.halfedge(he).next
    }

    /// Get the previous half-edge around the face.
    #[inline]
    pub fn prev(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.halfedge(he).prev
    }

    /// Get the origin vertex of a half-edge.
    #[inline]
    pub fn origin(&self, he: HalfEdgeId) -> VertexId {
        self.halfedge(he).origin
    }

    /// Get the destination vertex of a half-edge.
    #[inline]
    pub fn dest(&self, he: HalfEdgeId) -> VertexId {
        self.origin(self.twin(he))
    }

    /// Get the face of a half-edge.
    #[inline]
    pub fn face_of(&self, he: HalfEdgeId) -> FaceId {
        self.halfedge(he).face
    }

    /// Get the edge of a half-edge.
    #[inline]
    pub fn edge_of(&self, he: HalfEdgeId) -> EdgeId {
        self.halfedge(he).edge
    }

    /// Get the representative half-edge of an edge.
    ///
    /// This is an interior half-edge whenever the edge has at least one face.
    #[inline]
    pub fn edge_halfedge(&self, e: EdgeId) -> HalfEdgeId {
        self.edges[e.index()]
    }

    /// Get the `i`-th half-edge of a face, starting from its reference half-edge.
    #[inline]
    pub fn face_halfedge(&self, f: FaceId, i: usize) -> HalfEdgeId {
        let mut he = self.face(f).halfedge;
        for _ in 0..i % 3 {
            he = self.next(he);
        }
        he
    }

    /// Check if a half-edge is on the boundary.
    #[inline]
    pub fn is_boundary_halfedge(&self, he: HalfEdgeId) -> bool {
        self.halfedge(he).is_boundary()
    }

    /// Check if an edge lies on the boundary.
    #[inline]
    pub fn is_boundary_edge(&self, e: EdgeId) -> bool {
        let he = self.edge_halfedge(e);
        self.is_boundary_halfedge(he) || self.is_boundary_halfedge(self.twin(he))
    }

    /// Check if a vertex is on the boundary.
    pub fn is_boundary_vertex(&self, v: VertexId) -> bool {
        let start = self.vertex(v).halfedge;
        if !start.is_valid() {
            return true;
        }
        // the builder points boundary vertices at their boundary half-edge
        self.is_boundary_halfedge(start)
    }

    // ==================== Iteration ====================

    /// Iterate over all vertex IDs.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).map(VertexId::new)
    }

    /// Iterate over all half-edge IDs.
    pub fn halfedge_ids(&self) -> impl Iterator<Item = HalfEdgeId> + '_ {
        (0..self.halfedges.len()).map(HalfEdgeId::new)
    }

    /// Iterate over all face IDs.
    pub fn face_ids(&self) -> impl Iterator<Item = FaceId> + '_ {
        (0..self.faces.len()).map(FaceId::new)
    }

    /// Iterate over all edge IDs.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        (0..self.edges.len()).map(EdgeId::new)
    }

    /// Iterate over outgoing half-edges around a vertex.
    ///
    /// The traversal is clockwise. For boundary vertices it starts at the
    /// outgoing boundary half-edge, so faces come out in fan order.
    pub fn vertex_halfedges(&self, v: VertexId) -> VertexHalfEdgeIter<'_> {
        VertexHalfEdgeIter::new(self, v)
    }

    /// Iterate over vertices adjacent to a vertex.
    pub fn vertex_neighbors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.vertex_halfedges(v).map(|he| self.dest(he))
    }

    /// Iterate over faces adjacent to a vertex.
    pub fn vertex_faces(&self, v: VertexId) -> impl Iterator<Item = FaceId> + '_ {
        self.vertex_halfedges(v).filter_map(|he| {
            let f = self.face_of(he);
            f.is_valid().then_some(f)
        })
    }

    /// Iterate over half-edges around a face.
    pub fn face_halfedges(&self, f: FaceId) -> [HalfEdgeId; 3] {
        let he0 = self.face(f).halfedge;
        let he1 = self.next(he0);
        [he0, he1, self.next(he1)]
    }

    /// Get the three vertices of a triangular face.
    pub fn face_triangle(&self, f: FaceId) -> [VertexId; 3] {
        let [he0, he1, he2] = self.face_halfedges(f);
        [self.origin(he0), self.origin(he1), self.origin(he2)]
    }

    /// Get the positions of the three vertices of a triangular face.
    pub fn face_positions(&self, f: FaceId) -> [Point3<f64>; 3] {
        let [v0, v1, v2] = self.face_triangle(f);
        [*self.position(v0), *self.position(v1), *self.position(v2)]
    }

    // ==================== Geometry ====================

    /// Compute the unit normal of a face, zero for a zero-area face.
    pub fn face_normal(&self, f: FaceId) -> Vector3<f64> {
        let [p0, p1, p2] = self.face_positions(f);
        (p1 - p0).cross(&(p2 - p0)).try_normalize(0.0).unwrap_or_else(Vector3::zeros)
    }

    /// Compute the area of a face.
    pub fn face_area(&self, f: FaceId) -> f64 {
        let [p0, p1, p2] = self.face_positions(f);
        0.5 * (p1 - p0).cross(&(p2 - p0)).norm()
    }

    /// Compute the length of a half-edge in the embedding.
    pub fn edge_length(&self, he: HalfEdgeId) -> f64 {
        self.edge_vector(he).norm()
    }

    /// Compute the edge vector (from origin to destination).
    pub fn edge_vector(&self, he: HalfEdgeId) -> Vector3<f64> {
        self.position(self.dest(he)) - self.position(self.origin(he))
    }

    /// Compute the valence (degree) of a vertex.
    pub fn valence(&self, v: VertexId) -> usize {
        self.vertex_halfedges(v).count()
    }

    /// Compute the bounding box of the mesh.
    pub fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        let mut min = first.position;
        let mut max = first.position;
        for v in &self.vertices {
            for i in 0..3 {
                min[i] = min[i].min(v.position[i]);
                max[i] = max[i].max(v.position[i]);
            }
        }
        Some((min, max))
    }

    /// Length of the bounding box diagonal, zero for an empty mesh.
    pub fn bounding_box_diagonal(&self) -> f64 {
        self.bounding_box()
            .map(|(min, max)| (max - min).norm())
            .unwrap_or(0.0)
    }

    /// Number of boundary loops.
    pub fn num_boundary_loops(&self) -> usize {
        let mut visited = vec![false; self.halfedges.len()];
        let mut loops = 0;
        for he in self.halfedge_ids() {
            if visited[he.index()] || !self.is_boundary_halfedge(he) {
                continue;
            }
            loops += 1;
            let mut current = he;
            while !visited[current.index()] {
                visited[current.index()] = true;
                current = self.next(current);
            }
        }
        loops
    }

    /// Euler characteristic `V - E + F`.
    pub fn euler_characteristic(&self) -> i64 {
        self.num_vertices() as i64 - self.num_edges() as i64 + self.num_faces() as i64
    }

    // ==================== Validation ====================

    /// Check if the mesh is valid (all connectivity is consistent).
    pub fn is_valid(&self) -> bool {
        for (i, v) in self.vertices.iter().enumerate() {
            if v.halfedge.is_valid() && self.origin(v.halfedge).index() != i {
                return false;
            }
        }

        for (i, he) in self.halfedges.iter().enumerate() {
            let id = HalfEdgeId::new(i);
            if !he.twin.is_valid() || self.twin(he.twin) != id {
                return false;
            }
            if self.next(he.prev) != id || self.prev(he.next) != id {
                return false;
            }
            if self.edge_of(he.twin) != he.edge {
                return false;
            }
        }

        self.faces.iter().all(|f| f.halfedge.is_valid())
    }
}

/// Iterator over outgoing half-edges around a vertex.
pub struct VertexHalfEdgeIter<'a> {
    mesh: &'a HalfEdgeMesh,
    start: HalfEdgeId,
    current: HalfEdgeId,
    done: bool,
}

impl<'a> VertexHalfEdgeIter<'a> {
    fn new(mesh: &'a HalfEdgeMesh, v: VertexId) -> Self {
        let start = mesh.vertex(v).halfedge;
        Self {
            mesh,
            start,
            current: start,
            done: !start.is_valid(),
        }
    }
}

impl Iterator for VertexHalfEdgeIter<'_> {
    type Item = HalfEdgeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;

        // If he goes v -> w, then twin(he) goes w -> v and next(twin(he))
        // is the following outgoing half-edge of v.
        self.current = self.mesh.next(self.mesh.twin(self.current));

        if self.current == self.start {
            self.done = true;
        }

        Some(result)
    }
}
