//! Diagnostics for seamless parameterizations.

use std::collections::HashMap;
use std::f64::consts::PI;

use nalgebra::{Point2, Point3};

use crate::feature::VertexEdge;
use crate::mesh::UnionFind;

/// Cone angles within this distance of 2π are regular.
const CONE_TOLERANCE: f64 = 1e-8;

/// Axis alignment of each feature edge in UV space.
///
/// For every feature edge the result holds `min(|du|, |dv|) / |d|` over its
/// UV copies, taking the worst copy. Zero means aligned with an axis. Feature
/// edges that no face uses get `NaN`.
pub fn compute_feature_alignment(
    faces: &[[usize; 3]],
    uv: &[Point2<f64>],
    uv_faces: &[[usize; 3]],
    feature_edges: &[VertexEdge],
) -> Vec<f64> {
    let index: HashMap<VertexEdge, usize> = feature_edges.iter().enumerate().map(|(i, e)| (*e, i)).collect();
    let mut alignment = vec![f64::NAN; feature_edges.len()];

    for (face, uv_face) in faces.iter().zip(uv_faces) {
        for i in 0..3 {
            let j = (i + 1) % 3;
            let Some(&k) = index.get(&VertexEdge::new(face[i], face[j])) else {
                continue;
            };
            let d = uv[uv_face[j]] - uv[uv_face[i]];
            let norm = d.norm();
            let error = if norm > 0.0 { d.x.abs().min(d.y.abs()) / norm } else { 0.0 };
            alignment[k] = if alignment[k].is_nan() { error } else { alignment[k].max(error) };
        }
    }
    alignment
}

/// Per face local edge, whether the two sides of the edge use different UV
/// vertices. Mesh boundary edges are not seams.
pub fn find_seams(faces: &[[usize; 3]], uv_faces: &[[usize; 3]]) -> Vec<[bool; 3]> {
    let mut sides: HashMap<(usize, usize), (usize, usize)> = HashMap::with_capacity(3 * faces.len());
    for (face, uv_face) in faces.iter().zip(uv_faces) {
        for i in 0..3 {
            let j = (i + 1) % 3;
            sides.insert((face[i], face[j]), (uv_face[i], uv_face[j]));
        }
    }

    faces
        .iter()
        .zip(uv_faces)
        .map(|(face, uv_face)| {
            std::array::from_fn(|i| {
                let j = (i + 1) % 3;
                match sides.get(&(face[j], face[i])) {
                    Some(&(uj, ui)) => uj != uv_face[j] || ui != uv_face[i],
                    None => false,
                }
            })
        })
        .collect()
}

/// Number of undirected seam edges in a seam mask.
pub fn count_seams(is_seam: &[[bool; 3]]) -> usize {
    let half: usize = is_seam.iter().map(|f| f.iter().filter(|s| **s).count()).sum();
    half / 2
}

/// Sum of UV corner angles at each mesh vertex.
pub fn compute_cone_angles(faces: &[[usize; 3]], uv: &[Point2<f64>], uv_faces: &[[usize; 3]]) -> Vec<f64> {
    let num_vertices = faces.iter().flatten().max().map_or(0, |m| m + 1);
    let mut angles = vec![0.0; num_vertices];
    for (face, uv_face) in faces.iter().zip(uv_faces) {
        for i in 0..3 {
            let p = uv[uv_face[i]];
            let a = uv[uv_face[(i + 1) % 3]] - p;
            let b = uv[uv_face[(i + 2) % 3]] - p;
            let (cross, dot) = (a.x * b.y - a.y * b.x, a.dot(&b));
            angles[face[i]] += cross.abs().atan2(dot);
        }
    }
    angles
}

/// Vertices whose target angle differs from 2π, with `Θ − 2π`.
pub fn cone_vertices(th_hat: &[f64]) -> Vec<(usize, f64)> {
    th_hat
        .iter()
        .enumerate()
        .map(|(v, theta)| (v, theta - 2.0 * PI))
        .filter(|(_, defect)| defect.abs() > CONE_TOLERANCE)
        .collect()
}

/// One connected piece of a UV layout, with unreferenced vertices removed.
#[derive(Debug, Clone, Default)]
pub struct UvComponent {
    /// Faces of the full mesh in this component.
    pub face_indices: Vec<usize>,
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,
    /// Faces in local vertex indices.
    pub faces: Vec<[usize; 3]>,
    /// UV positions.
    pub uv: Vec<Point2<f64>>,
    /// Faces in local UV indices.
    pub uv_faces: Vec<[usize; 3]>,
}

/// Keep the values the faces reference, renumbered in order of first use.
fn reindex<T: Copy>(faces: &[[usize; 3]], values: &[T]) -> (Vec<T>, Vec<[usize; 3]>) {
    let mut local: HashMap<usize, usize> = HashMap::new();
    let mut kept = Vec::new();
    let faces = faces
        .iter()
        .map(|face| {
            face.map(|i| {
                *local.entry(i).or_insert_with(|| {
                    kept.push(values[i]);
                    kept.len() - 1
                })
            })
        })
        .collect();
    (kept, faces)
}

/// Split a parameterized mesh into pieces connected across UV edges.
pub fn split_components(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    uv: &[Point2<f64>],
    uv_faces: &[[usize; 3]],
) -> Vec<UvComponent> {
    let mut connected = UnionFind::new(uv_faces.len());
    let mut edge_face: HashMap<(usize, usize), usize> = HashMap::new();
    for (f, uv_face) in uv_faces.iter().enumerate() {
        for i in 0..3 {
            let (a, b) = (uv_face[i], uv_face[(i + 1) % 3]);
            if let Some(&g) = edge_face.get(&(b, a)) {
                connected.union(f, g);
            }
            edge_face.insert((a, b), f);
        }
    }

    let (labels, count) = connected.labels();
    let mut components = vec![UvComponent::default(); count];
    for (f, &c) in labels.iter().enumerate() {
        components[c].face_indices.push(f);
    }
    for component in &mut components {
        let selected: Vec<[usize; 3]> = component.face_indices.iter().map(|&f| faces[f]).collect();
        let selected_uv: Vec<[usize; 3]> = component.face_indices.iter().map(|&f| uv_faces[f]).collect();
        (component.vertices, component.faces) = reindex(&selected, vertices);
        (component.uv, component.uv_faces) = reindex(&selected_uv, uv);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two triangles sharing the diagonal of the unit square.
    fn square() -> (Vec<[usize; 3]>, Vec<Point2<f64>>) {
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        let uv = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        (faces, uv)
    }

    #[test]
    fn test_feature_alignment() {
        let (faces, uv) = square();
        let features = [VertexEdge::new(0, 1), VertexEdge::new(0, 2), VertexEdge::new(5, 6)];
        let alignment = compute_feature_alignment(&faces, &uv, &faces, &features);
        assert_relative_eq!(alignment[0], 0.0);
        assert_relative_eq!(alignment[1], 0.5f64.sqrt(), epsilon = 1e-12);
        assert!(alignment[2].is_nan());
    }

    #[test]
    fn test_seams() {
        let (faces, mut uv) = square();
        assert_eq!(count_seams(&find_seams(&faces, &faces)), 0);

        // give the second face its own copy of the diagonal
        uv.push(uv[0]);
        uv.push(uv[2]);
        let uv_faces = vec![[0, 1, 2], [4, 5, 3]];
        let seams = find_seams(&faces, &uv_faces);
        assert_eq!(seams[0], [false, false, true]);
        assert_eq!(seams[1], [true, false, false]);
        assert_eq!(count_seams(&seams), 1);

        let components = split_components(
            &[Point3::origin(); 4],
            &faces,
            &uv,
            &uv_faces,
        );
        assert_eq!(components.len(), 2);
        assert_eq!(components[1].uv.len(), 3);
    }

    #[test]
    fn test_cone_angles_of_flat_square() {
        let (faces, uv) = square();
        let angles = compute_cone_angles(&faces, &uv, &faces);
        assert_relative_eq!(angles[0], PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(angles[1], PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cone_vertices() {
        let cones = cone_vertices(&[2.0 * PI, 1.5 * PI, 2.0 * PI + 1e-12, 2.5 * PI]);
        assert_eq!(cones.len(), 2);
        assert_eq!(cones[0].0, 1);
        assert_relative_eq!(cones[0].1, -0.5 * PI, epsilon = 1e-12);
        assert_eq!(cones[1].0, 3);
    }
}
