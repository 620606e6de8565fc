//! Splitting chords between feature vertices.
//!
//! A chord is a non-feature interior edge whose endpoints both lie on
//! features. After cutting, such an edge would join two boundary vertices and
//! pin the layout, so every chord is split at its midpoint. Faces are then
//! subdivided red/green style depending on how many of their edges were
//! split. New edges all touch a midpoint, so a single pass removes every
//! chord.

use std::collections::HashMap;

use nalgebra::Point3;

use super::finder::dihedral_angle;
use super::{FeatureEdges, FeatureFinder, FeatureOptions, RefinedFeatureMesh, VertexEdge};
use crate::error::Result;
use crate::mesh::HalfEdgeMesh;

/// Non-feature interior edges whose endpoints are both feature vertices.
fn find_chords(mesh: &HalfEdgeMesh, finder: &FeatureFinder) -> Vec<VertexEdge> {
    let mut on_feature = vec![false; mesh.num_vertices()];
    for e in mesh.edge_ids().filter(|&e| finder.is_feature(e)) {
        let h = mesh.edge_halfedge(e);
        on_feature[mesh.origin(h).index()] = true;
        on_feature[mesh.dest(h).index()] = true;
    }

    mesh.edge_ids()
        .filter(|&e| !finder.is_feature(e) && !mesh.is_boundary_edge(e))
        .filter_map(|e| {
            let h = mesh.edge_halfedge(e);
            let (a, b) = (mesh.origin(h).index(), mesh.dest(h).index());
            (on_feature[a] && on_feature[b]).then(|| VertexEdge::new(a, b))
        })
        .collect()
}

/// Split every chord of the given features.
///
/// Feature edges keep their vertex indices, since only non-feature edges are
/// split. Returns the input unchanged when there are no chords.
pub fn refine_feature_chords(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    features: &FeatureEdges,
) -> Result<RefinedFeatureMesh> {
    let mut finder = FeatureFinder::new(vertices, faces)?;
    finder.mark_features(&features.features)?;
    let chords = find_chords(finder.mesh(), &finder);

    let mut refined_vertices = vertices.to_vec();
    let mut endpoints: Vec<Option<[usize; 2]>> = vec![None; vertices.len()];
    let mut midpoint: HashMap<VertexEdge, usize> = HashMap::with_capacity(chords.len());
    for chord in &chords {
        midpoint.insert(*chord, refined_vertices.len());
        refined_vertices.push(Point3::from((vertices[chord.v0].coords + vertices[chord.v1].coords) * 0.5));
        endpoints.push(Some([chord.v0, chord.v1]));
    }

    let mut refined_faces = Vec::with_capacity(faces.len() + 3 * chords.len());
    let mut face_parents = Vec::with_capacity(faces.len() + 3 * chords.len());
    for (f, c) in faces.iter().enumerate() {
        let m: [Option<usize>; 3] =
            std::array::from_fn(|i| midpoint.get(&VertexEdge::new(c[i], c[(i + 1) % 3])).copied());
        let split: Vec<usize> = (0..3).filter(|&i| m[i].is_some()).collect();

        let children: Vec<[usize; 3]> = match split.len() {
            0 => vec![*c],
            1 => {
                let i = split[0];
                let mi = m[i].unwrap_or_default();
                vec![[c[i], mi, c[(i + 2) % 3]], [mi, c[(i + 1) % 3], c[(i + 2) % 3]]]
            }
            2 => {
                let k = (0..3).find(|&i| m[i].is_none()).unwrap_or_default();
                let (a, b, cc) = (c[k], c[(k + 1) % 3], c[(k + 2) % 3]);
                let m1 = m[(k + 1) % 3].unwrap_or_default();
                let m2 = m[(k + 2) % 3].unwrap_or_default();
                vec![[m1, cc, m2], [a, b, m1], [a, m1, m2]]
            }
            _ => {
                let [m0, m1, m2] = m.map(|x| x.unwrap_or_default());
                vec![[c[0], m0, m2], [m0, c[1], m1], [m2, m1, c[2]], [m0, m1, m2]]
            }
        };
        face_parents.extend(std::iter::repeat(f).take(children.len()));
        refined_faces.extend(children);
    }

    if !chords.is_empty() {
        log::info!(
            "split {} feature chords: {} faces became {}",
            chords.len(),
            faces.len(),
            refined_faces.len()
        );
    }

    Ok(RefinedFeatureMesh {
        vertices: refined_vertices,
        faces: refined_faces,
        feature_edges: features.features.clone(),
        hard_feature_edges: features.hard.clone(),
        face_parents,
        endpoints,
    })
}

/// Detect features by dihedral angle and split the chords they leave.
///
/// Soft features exceed `feature_angle` or lie on the open boundary; hard
/// features are the interior features that also exceed `hard_feature_angle`.
pub fn generate_refined_feature_mesh(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    options: &FeatureOptions,
) -> Result<RefinedFeatureMesh> {
    let mut finder = FeatureFinder::new(vertices, faces)?;
    finder.mark_dihedral_angle_features(options.feature_angle);
    finder.prune_small_features(options.min_feature_length);

    let mesh = finder.mesh();
    let hard_threshold = options.hard_feature_angle.to_radians();
    let hard: Vec<VertexEdge> = mesh
        .edge_ids()
        .filter(|&e| finder.is_feature(e) && !mesh.is_boundary_edge(e) && dihedral_angle(mesh, e) > hard_threshold)
        .map(|e| {
            let h = mesh.edge_halfedge(e);
            VertexEdge::new(mesh.origin(h).index(), mesh.dest(h).index())
        })
        .collect();
    let features = FeatureEdges {
        features: finder.feature_edges(),
        hard,
    };
    log::info!(
        "detected {} feature edges ({} hard)",
        features.features.len(),
        features.hard.len()
    );

    if options.refine {
        refine_feature_chords(vertices, faces, &features)
    } else {
        Ok(RefinedFeatureMesh {
            vertices: vertices.to_vec(),
            faces: faces.to_vec(),
            feature_edges: features.features,
            hard_feature_edges: features.hard,
            face_parents: (0..faces.len()).collect(),
            endpoints: vec![None; vertices.len()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, shapes};

    #[test]
    fn test_cube_refinement_removes_chords() {
        let (vertices, faces) = shapes::cube(1);
        let refined = generate_refined_feature_mesh(&vertices, &faces, &FeatureOptions::default()).unwrap();

        // every face diagonal of the unit cube is a chord
        assert_eq!(refined.num_inserted(), 6);
        assert_eq!(refined.faces.len(), 24);
        assert_eq!(refined.feature_edges.len(), 12);
        assert_eq!(refined.hard_feature_edges.len(), 12);

        let mesh = build_from_triangles(&refined.vertices, &refined.faces).unwrap();
        assert_eq!(mesh.euler_characteristic(), 2);

        let mut finder = FeatureFinder::new(&refined.vertices, &refined.faces).unwrap();
        finder.mark_features(&refined.feature_edges).unwrap();
        assert!(find_chords(finder.mesh(), &finder).is_empty());
        finder.generate_feature_cut_mesh().unwrap();
    }

    #[test]
    fn test_endpoints_and_parents() {
        let (vertices, faces) = shapes::cube(1);
        let refined = generate_refined_feature_mesh(&vertices, &faces, &FeatureOptions::default()).unwrap();

        for (v, endpoints) in refined.endpoints.iter().enumerate() {
            match endpoints {
                None => assert!(v < vertices.len()),
                Some([a, b]) => {
                    let expected = (vertices[*a].coords + vertices[*b].coords) * 0.5;
                    assert_eq!(refined.vertices[v].coords, expected);
                }
            }
        }
        // each parent face is split in two by its diagonal
        for f in 0..faces.len() {
            assert_eq!(refined.face_parents.iter().filter(|p| **p == f).count(), 2);
        }
    }

    #[test]
    fn test_three_way_split() {
        // a central triangle whose three neighbors each add one boundary corner
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 0.9, 0.0),
            Point3::new(0.5, -0.8, 0.0),
            Point3::new(1.2, 0.8, 0.0),
            Point3::new(-0.2, 0.8, 0.0),
        ];
        let faces = vec![[0, 1, 2], [1, 0, 3], [2, 1, 4], [0, 2, 5]];
        let features = FeatureEdges {
            features: [[0, 3], [3, 1], [1, 4], [4, 2], [2, 5], [5, 0]]
                .into_iter()
                .map(VertexEdge::from)
                .collect(),
            hard: Vec::new(),
        };
        let refined = refine_feature_chords(&vertices, &faces, &features).unwrap();

        assert_eq!(refined.num_inserted(), 3);
        assert_eq!(refined.faces.len(), 10);
        assert_eq!(refined.face_parents.iter().filter(|p| **p == 0).count(), 4);
        let mesh = build_from_triangles(&refined.vertices, &refined.faces).unwrap();
        assert_eq!(mesh.euler_characteristic(), 1);
        assert_eq!(mesh.num_boundary_loops(), 1);
    }

    #[test]
    fn test_flat_grid_has_boundary_features_only() {
        let (vertices, faces) = shapes::grid(4, 4, 1.0, 1.0);
        let refined = generate_refined_feature_mesh(&vertices, &faces, &FeatureOptions::default()).unwrap();
        assert_eq!(refined.feature_edges.len(), 16);
        assert!(refined.hard_feature_edges.is_empty());
        // corner quads have a diagonal between two boundary vertices
        assert!(refined.num_inserted() > 0);
    }
}
