//! Seamless UV layouts and their diagnostics.
//!
//! [`layout_metric`] turns a converged marked metric into per-corner UV
//! coordinates. The [`analysis`] functions measure an existing layout: how
//! well feature edges follow the axes, where the seams run, and which
//! vertices are cones.

pub mod analysis;
mod parameterize;

pub use analysis::{
    compute_cone_angles, compute_feature_alignment, cone_vertices, count_seams, find_seams,
    split_components, UvComponent,
};
pub use parameterize::{layout_metric, MetricLayout};

use nalgebra::{Point2, Point3};

/// A parameterized mesh.
#[derive(Debug, Clone, Default)]
pub struct Parameterization {
    /// Vertex positions, including vertices inserted by refinement.
    pub vertices: Vec<Point3<f64>>,
    /// Faces in vertex indices.
    pub faces: Vec<[usize; 3]>,
    /// UV positions.
    pub uv: Vec<Point2<f64>>,
    /// Faces in UV indices.
    pub uv_faces: Vec<[usize; 3]>,
    /// Input face of each face.
    pub face_map: Vec<usize>,
    /// For inserted vertices, the two input vertices they split.
    pub endpoints: Vec<Option<[usize; 2]>>,
}

impl Parameterization {
    /// Number of faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Bounding box of the UV coordinates, or `None` when empty.
    pub fn uv_bounding_box(&self) -> Option<(Point2<f64>, Point2<f64>)> {
        let first = *self.uv.first()?;
        Some(self.uv.iter().fold((first, first), |(min, max), p| {
            (
                Point2::new(min.x.min(p.x), min.y.min(p.y)),
                Point2::new(max.x.max(p.x), max.y.max(p.y)),
            )
        }))
    }

    /// UV length of local edge `i` of face `f`.
    pub fn uv_edge_length(&self, f: usize, i: usize) -> f64 {
        let face = self.uv_faces[f];
        (self.uv[face[(i + 1) % 3]] - self.uv[face[i]]).norm()
    }

    /// Per face local edge seam flags.
    pub fn seams(&self) -> Vec<[bool; 3]> {
        find_seams(&self.faces, &self.uv_faces)
    }

    /// Split into pieces connected across UV edges.
    pub fn components(&self) -> Vec<UvComponent> {
        split_components(&self.vertices, &self.faces, &self.uv, &self.uv_faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_and_edge_length() {
        let param = Parameterization {
            vertices: vec![Point3::origin(); 3],
            faces: vec![[0, 1, 2]],
            uv: vec![Point2::new(-1.0, 0.0), Point2::new(2.0, 0.0), Point2::new(0.0, 4.0)],
            uv_faces: vec![[0, 1, 2]],
            face_map: vec![0],
            endpoints: vec![None; 3],
        };
        let (min, max) = param.uv_bounding_box().unwrap();
        assert_eq!(min, Point2::new(-1.0, 0.0));
        assert_eq!(max, Point2::new(2.0, 4.0));
        assert_eq!(param.uv_edge_length(0, 0), 3.0);
        assert_eq!(param.components().len(), 1);
        assert!(Parameterization::default().uv_bounding_box().is_none());
    }
}
