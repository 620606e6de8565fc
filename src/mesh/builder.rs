//! Mesh construction utilities.
//!
//! Builds half-edge meshes from face-vertex lists and converts back. The
//! builder is deterministic: half-edge, boundary, and edge numbering depend
//! only on the face order, never on hash iteration order.

use std::collections::HashMap;

use nalgebra::Point3;

use super::halfedge::{Face, HalfEdge, HalfEdgeMesh, Vertex};
use super::index::{EdgeId, FaceId, HalfEdgeId, VertexId};
use crate::error::{MeshError, Result};

/// Build a half-edge mesh from vertices and triangle faces.
///
/// Faces must be consistently oriented and manifold. Vertices that no face
/// references are kept but have no outgoing half-edge.
///
/// # Example
/// ```
/// use penner::mesh::build_from_triangles;
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ];
/// let mesh = build_from_triangles(&vertices, &[[0, 1, 2]]).unwrap();
/// assert_eq!(mesh.num_edges(), 3);
/// ```
pub fn build_from_triangles(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Result<HalfEdgeMesh> {
    if faces.is_empty() {
        return Err(MeshError::EmptyMesh);
    }

    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= vertices.len() {
                return Err(MeshError::InvalidVertexIndex { face: fi, vertex: vi });
            }
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(MeshError::DegenerateFace { face: fi });
        }
    }

    let mut mesh = HalfEdgeMesh {
        vertices: vertices.iter().map(|&p| Vertex::new(p)).collect(),
        halfedges: Vec::with_capacity(faces.len() * 3 + faces.len() / 2),
        faces: Vec::with_capacity(faces.len()),
        edges: Vec::with_capacity(faces.len() * 3 / 2 + 1),
    };

    // Map from directed edge (v0, v1) to half-edge ID
    let mut edge_map: HashMap<(usize, usize), HalfEdgeId> = HashMap::with_capacity(faces.len() * 3);

    // First pass: interior half-edges and faces
    for (fi, face) in faces.iter().enumerate() {
        let base = mesh.halfedges.len();
        let face_id = FaceId::new(fi);
        mesh.faces.push(Face {
            halfedge: HalfEdgeId::new(base),
        });

        for i in 0..3 {
            let he = HalfEdgeId::new(base + i);
            mesh.halfedges.push(HalfEdge {
                origin: VertexId::new(face[i]),
                twin: HalfEdgeId::invalid(),
                next: HalfEdgeId::new(base + (i + 1) % 3),
                prev: HalfEdgeId::new(base + (i + 2) % 3),
                face: face_id,
                edge: EdgeId::invalid(),
            });
            mesh.vertices[face[i]].halfedge = he;

            let key = (face[i], face[(i + 1) % 3]);
            if edge_map.insert(key, he).is_some() {
                return Err(MeshError::NonManifoldEdge {
                    v0: key.0,
                    v1: key.1,
                });
            }
        }
    }

    // Second pass: link twins in half-edge order, creating boundary half-edges
    let num_interior = mesh.halfedges.len();
    for i in 0..num_interior {
        let he = HalfEdgeId::new(i);
        if mesh.halfedges[i].twin.is_valid() {
            continue;
        }
        let v0 = mesh.halfedges[i].origin.index();
        let v1 = mesh.origin(mesh.next(he)).index();

        if let Some(&twin) = edge_map.get(&(v1, v0)) {
            mesh.halfedges[i].twin = twin;
            mesh.halfedges[twin.index()].twin = he;
        } else {
            let boundary = HalfEdgeId::new(mesh.halfedges.len());
            mesh.halfedges.push(HalfEdge {
                origin: VertexId::new(v1),
                twin: he,
                ..HalfEdge::default()
            });
            mesh.halfedges[i].twin = boundary;
        }
    }

    link_boundary_loops(&mut mesh)?;
    fix_boundary_vertex_halfedges(&mut mesh);
    check_vertex_fans(&mut mesh, faces)?;
    assign_edges(&mut mesh);

    Ok(mesh)
}

/// Link boundary half-edges into loops.
///
/// Fails if a vertex has more than one outgoing boundary half-edge, since the
/// boundary loops through it could not be told apart.
fn link_boundary_loops(mesh: &mut HalfEdgeMesh) -> Result<()> {
    let boundary_hes: Vec<HalfEdgeId> = mesh
        .halfedge_ids()
        .filter(|&he| mesh.is_boundary_halfedge(he))
        .collect();

    let mut outgoing: HashMap<usize, HalfEdgeId> = HashMap::with_capacity(boundary_hes.len());
    for &he in &boundary_hes {
        let origin = mesh.origin(he).index();
        if outgoing.insert(origin, he).is_some() {
            return Err(MeshError::NonManifold {
                details: format!("vertex {} lies on more than one boundary fan", origin),
            });
        }
    }

    for &he in &boundary_hes {
        let dest = mesh.dest(he).index();
        let next_he = outgoing.get(&dest).copied().ok_or_else(|| MeshError::NonManifold {
            details: format!("boundary loop is not closed at vertex {}", dest),
        })?;
        mesh.halfedges[he.index()].next = next_he;
        mesh.halfedges[next_he.index()].prev = he;
    }

    Ok(())
}

/// Ensure boundary vertices point to their outgoing boundary half-edge.
fn fix_boundary_vertex_halfedges(mesh: &mut HalfEdgeMesh) {
    for he in 0..mesh.halfedges.len() {
        if mesh.halfedges[he].is_boundary() {
            let origin = mesh.halfedges[he].origin.index();
            mesh.vertices[origin].halfedge = HalfEdgeId::new(he);
        }
    }
}

/// Reject vertices whose faces do not form a single fan.
fn check_vertex_fans(mesh: &mut HalfEdgeMesh, faces: &[[usize; 3]]) -> Result<()> {
    let mut incidence = vec![0usize; mesh.num_vertices()];
    for face in faces {
        for &v in face {
            incidence[v] += 1;
        }
    }

    for v in mesh.vertex_ids() {
        let fan = mesh.vertex_faces(v).count();
        if fan != incidence[v.index()] {
            return Err(MeshError::NonManifold {
                details: format!(
                    "vertex {} has {} incident faces but a fan of {}",
                    v.index(),
                    incidence[v.index()],
                    fan
                ),
            });
        }
    }
    Ok(())
}

/// Number the undirected edges in half-edge order.
fn assign_edges(mesh: &mut HalfEdgeMesh) {
    for i in 0..mesh.halfedges.len() {
        if mesh.halfedges[i].edge.is_valid() {
            continue;
        }
        let e = EdgeId::new(mesh.edges.len());
        let twin = mesh.halfedges[i].twin.index();
        mesh.halfedges[i].edge = e;
        mesh.halfedges[twin].edge = e;
        mesh.edges.push(HalfEdgeId::new(i));
    }
}

/// Convert a half-edge mesh back to a face-vertex representation.
pub fn to_face_vertex(mesh: &HalfEdgeMesh) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let vertices: Vec<Point3<f64>> = mesh.vertex_ids().map(|v| *mesh.position(v)).collect();

    let faces: Vec<[usize; 3]> = mesh
        .face_ids()
        .map(|f| {
            let [v0, v1, v2] = mesh.face_triangle(f);
            [v0.index(), v1.index(), v2.index()]
        })
        .collect();

    (vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::shapes;

    #[test]
    fn test_single_triangle() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
        ];
        let mesh = build_from_triangles(&vertices, &[[0, 1, 2]]).unwrap();

        assert_eq!(mesh.num_halfedges(), 6);
        assert!(mesh.is_valid());
        for v in mesh.vertex_ids() {
            assert!(mesh.is_boundary_vertex(v));
        }
    }

    #[test]
    fn test_closed_octahedron() {
        let (vertices, faces) = shapes::octahedron();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_halfedges(), 24);
        assert_eq!(mesh.num_edges(), 12);
        assert_eq!(mesh.euler_characteristic(), 2);
        assert!(mesh.is_valid());
        assert!(mesh.vertex_ids().all(|v| !mesh.is_boundary_vertex(v)));
    }

    #[test]
    fn test_deterministic_numbering() {
        let (vertices, faces) = shapes::grid(4, 3, 1.0, 1.0);
        let a = build_from_triangles(&vertices, &faces).unwrap();
        let b = build_from_triangles(&vertices, &faces).unwrap();
        for he in a.halfedge_ids() {
            assert_eq!(a.twin(he), b.twin(he));
            assert_eq!(a.edge_of(he), b.edge_of(he));
        }
    }

    #[test]
    fn test_invalid_vertex_index() {
        let vertices = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        let result = build_from_triangles(&vertices, &[[0, 1, 2]]);
        assert!(matches!(result, Err(MeshError::InvalidVertexIndex { .. })));
    }

    #[test]
    fn test_degenerate_face() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
        ];
        let result = build_from_triangles(&vertices, &[[0, 1, 1]]);
        assert!(matches!(result, Err(MeshError::DegenerateFace { .. })));
    }

    #[test]
    fn test_non_manifold_edge() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, -1.0, 0.0),
        ];
        // both faces contain the directed edge 0 -> 1
        let result = build_from_triangles(&vertices, &[[0, 1, 2], [0, 1, 3]]);
        assert!(matches!(result, Err(MeshError::NonManifoldEdge { v0: 0, v1: 1 })));
    }

    #[test]
    fn test_bowtie_vertex() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(-1.0, -1.0, 0.0),
        ];
        let result = build_from_triangles(&vertices, &[[0, 1, 2], [0, 3, 4]]);
        assert!(matches!(result, Err(MeshError::NonManifold { .. })));
    }

    #[test]
    fn test_roundtrip_face_vertex() {
        let (vertices, faces) = shapes::grid(3, 3, 2.0, 1.0);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let (v2, f2) = to_face_vertex(&mesh);
        assert_eq!(v2, vertices);
        assert_eq!(f2, faces);
    }
}
