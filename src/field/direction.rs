//! Curvature-driven target directions for field generation.
//!
//! Each edge contributes a rank-one tensor `β_e |e| ê êᵀ`, where `β_e` is the
//! signed dihedral angle. Tensors are gathered over the vertex rings around a
//! face and projected into the face plane; a face with a strongly anisotropic
//! tensor is fixed along its dominant eigenvector.

use std::collections::VecDeque;

use nalgebra::{Matrix2, Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

use super::FieldDirections;
use crate::error::Result;
use crate::mesh::{build_from_triangles, FaceId, HalfEdgeId, HalfEdgeMesh, VertexId};

/// Signed dihedral angle across the edge of `h`, zero on the boundary.
fn signed_dihedral(mesh: &HalfEdgeMesh, h: HalfEdgeId) -> f64 {
    let t = mesh.twin(h);
    if mesh.is_boundary_halfedge(h) || mesh.is_boundary_halfedge(t) {
        return 0.0;
    }
    let (Some(nf), Some(ng), Some(e)) = (
        unit_normal(mesh, mesh.face_of(h)),
        unit_normal(mesh, mesh.face_of(t)),
        mesh.edge_vector(h).try_normalize(0.0),
    ) else {
        return 0.0;
    };
    nf.cross(&ng).dot(&e).atan2(nf.dot(&ng))
}

/// Unit normal of `f`, or `None` for a zero-area face.
fn unit_normal(mesh: &HalfEdgeMesh, f: FaceId) -> Option<Vector3<f64>> {
    let [p0, p1, p2] = mesh.face_positions(f);
    (p1 - p0).cross(&(p2 - p0)).try_normalize(0.0)
}

/// Half the edge tensors around each vertex, and a third of the incident area.
fn vertex_tensors(mesh: &HalfEdgeMesh) -> Vec<(Matrix3<f64>, f64)> {
    let mut tensors = vec![(Matrix3::zeros(), 0.0); mesh.num_vertices()];
    for e in mesh.edge_ids() {
        let h = mesh.edge_halfedge(e);
        let vector = mesh.edge_vector(h);
        let length = vector.norm();
        if length == 0.0 {
            continue;
        }
        let unit = vector / length;
        let tensor = 0.5 * signed_dihedral(mesh, h) * length * unit * unit.transpose();
        tensors[mesh.origin(h).index()].0 += tensor;
        tensors[mesh.dest(h).index()].0 += tensor;
    }
    for f in mesh.face_ids() {
        let area = mesh.face_area(f) / 3.0;
        for v in mesh.face_triangle(f) {
            tensors[v.index()].1 += area;
        }
    }
    tensors
}

/// Vertices within `radius` rings of the corners of `f`.
fn face_neighborhood(mesh: &HalfEdgeMesh, f: FaceId, radius: usize) -> Vec<VertexId> {
    let mut depth = std::collections::HashMap::new();
    let mut queue = VecDeque::new();
    for v in mesh.face_triangle(f) {
        depth.insert(v, 0usize);
        queue.push_back(v);
    }
    while let Some(v) = queue.pop_front() {
        let d = depth[&v];
        if d >= radius {
            continue;
        }
        for w in mesh.vertex_neighbors(v) {
            if !depth.contains_key(&w) {
                depth.insert(w, d + 1);
                queue.push_back(w);
            }
        }
    }
    depth.into_keys().collect()
}

/// Direction along the longest boundary edge of `f`, if it has one of
/// nonzero length.
fn boundary_direction(mesh: &HalfEdgeMesh, f: FaceId) -> Option<Vector3<f64>> {
    mesh.face_halfedges(f)
        .into_iter()
        .filter(|&h| mesh.is_boundary_halfedge(mesh.twin(h)))
        .map(|h| mesh.edge_vector(h))
        .max_by(|a, b| a.norm().total_cmp(&b.norm()))
        .and_then(|v| v.try_normalize(0.0))
}

/// Estimate per-face target directions from surface curvature.
///
/// Faces on the mesh boundary are fixed along their longest boundary edge.
/// Other faces are fixed when the projected tensor over the `radius`-ring
/// neighbourhood has an eigenvalue gap per unit area above `abs_anisotropy`
/// and a relative gap above `rel_anisotropy`; free faces get their reference
/// half-edge direction.
pub fn compute_field_direction(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    radius: usize,
    abs_anisotropy: f64,
    rel_anisotropy: f64,
) -> Result<FieldDirections> {
    let mesh = build_from_triangles(vertices, faces)?;
    let tensors = vertex_tensors(&mesh);

    let per_face: Vec<(Vector3<f64>, bool)> = (0..mesh.num_faces())
        .into_par_iter()
        .map(|i| {
            let f = FaceId::new(i);
            let reference = mesh
                .edge_vector(mesh.face_halfedge(f, 0))
                .try_normalize(0.0)
                .unwrap_or_else(Vector3::x);
            if let Some(direction) = boundary_direction(&mesh, f) {
                return (direction, true);
            }
            let Some(normal) = unit_normal(&mesh, f) else {
                return (reference, false);
            };

            let (tensor, area) = face_neighborhood(&mesh, f, radius)
                .into_iter()
                .fold((Matrix3::zeros(), 0.0), |(t, a), v| {
                    (t + tensors[v.index()].0, a + tensors[v.index()].1)
                });

            let bitangent = normal.cross(&reference);
            let projected = Matrix2::new(
                reference.dot(&(tensor * reference)),
                reference.dot(&(tensor * bitangent)),
                bitangent.dot(&(tensor * reference)),
                bitangent.dot(&(tensor * bitangent)),
            );
            let eigen = SymmetricEigen::new(projected);
            let (l0, l1) = (eigen.eigenvalues[0], eigen.eigenvalues[1]);
            let dominant = if l0.abs() >= l1.abs() { 0 } else { 1 };
            let column = eigen.eigenvectors.column(dominant);

            let gap = (l0 - l1).abs();
            let magnitude = l0.abs() + l1.abs();
            let is_fixed = area > 0.0
                && magnitude > 0.0
                && gap / area > abs_anisotropy
                && gap / magnitude > rel_anisotropy;

            if is_fixed {
                let direction = (column[0] * reference + column[1] * bitangent)
                    .try_normalize(0.0)
                    .unwrap_or(reference);
                (direction, true)
            } else {
                (reference, false)
            }
        })
        .collect();

    let (direction, is_fixed): (Vec<_>, Vec<_>) = per_face.into_iter().unzip();
    let directions = FieldDirections { direction, is_fixed };
    log::debug!(
        "fixed {} of {} face directions",
        directions.num_fixed(),
        mesh.num_faces()
    );
    Ok(directions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::shapes;
    use approx::assert_relative_eq;

    fn is_axis_aligned(d: &Vector3<f64>) -> bool {
        let max = d.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        (max - 1.0).abs() < 1e-6
    }

    #[test]
    fn test_flat_grid_fixes_boundary_only() {
        let (vertices, faces) = shapes::grid(6, 6, 1.0, 1.0);
        let directions = compute_field_direction(&vertices, &faces, 2, 0.0, 0.5).unwrap();

        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        for f in mesh.face_ids() {
            let on_boundary = boundary_direction(&mesh, f).is_some();
            assert_eq!(directions.is_fixed[f.index()], on_boundary);
        }
    }

    #[test]
    fn test_cube_directions_follow_edges() {
        let (vertices, faces) = shapes::cube(3);
        let directions = compute_field_direction(&vertices, &faces, 1, 0.0, 0.5).unwrap();

        assert!(directions.num_fixed() > 0);
        for (d, fixed) in directions.direction.iter().zip(&directions.is_fixed) {
            assert_relative_eq!(d.norm(), 1.0, epsilon = 1e-9);
            if *fixed {
                assert!(is_axis_aligned(d), "direction {:?} is not along an axis", d);
            }
        }
    }

    #[test]
    fn test_radius_counts_vertex_rings() {
        let (vertices, faces) = shapes::grid(6, 6, 1.0, 1.0);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let f = mesh
            .face_ids()
            .find(|&f| mesh.face_triangle(f).iter().all(|&v| !mesh.is_boundary_vertex(v)))
            .unwrap();

        assert_eq!(face_neighborhood(&mesh, f, 0).len(), 3);
        let ring = face_neighborhood(&mesh, f, 1);
        for v in mesh.face_triangle(f) {
            for w in mesh.vertex_neighbors(v) {
                assert!(ring.contains(&w), "vertex {:?} missing from the first ring", w);
            }
        }
        assert!(face_neighborhood(&mesh, f, 2).len() > ring.len());
    }

    #[test]
    fn test_coincident_boundary_vertices_give_finite_directions() {
        let (mut vertices, faces) = shapes::grid(2, 2, 1.0, 1.0);
        // collapse the first boundary edge, leaving one zero-area face
        vertices[1] = vertices[0];
        let directions = compute_field_direction(&vertices, &faces, 2, 0.0, 0.5).unwrap();

        for d in &directions.direction {
            assert!(d.iter().all(|x| x.is_finite()), "direction {:?} is not finite", d);
            assert_relative_eq!(d.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_signed_dihedral_of_cube_edge() {
        let (vertices, faces) = shapes::cube(1);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let max = mesh
            .halfedge_ids()
            .map(|h| signed_dihedral(&mesh, h).abs())
            .fold(0.0, f64::max);
        assert_relative_eq!(max, std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }
}
