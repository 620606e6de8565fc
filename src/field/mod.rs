//! Intrinsic cross fields on cut meshes.
//!
//! A field assigns each face an angle `theta` relative to the face's
//! reference half-edge (local edge 0). Neighbouring faces are related by the
//! Levi-Civita transport angle `kappa`, an integer period jump, and the
//! rotation form that the marked metric later absorbs:
//!
//! ```text
//! theta_g = theta_f + kappa(h) + (2π/N) period_jump(h) + ω(h)
//! ```
//!
//! # Example
//!
//! ```
//! use penner::field::{compute_field_direction, FieldOptions};
//! use penner::mesh::shapes;
//!
//! let (vertices, faces) = shapes::cube(2);
//! let options = FieldOptions::default();
//! let directions = compute_field_direction(
//!     &vertices,
//!     &faces,
//!     options.radius,
//!     options.abs_anisotropy,
//!     options.rel_anisotropy,
//! )
//! .unwrap();
//! assert_eq!(directions.direction.len(), faces.len());
//! ```

mod cones;
mod direction;
mod nrosy;

pub use direction::compute_field_direction;
pub use nrosy::{FieldAngles, IntrinsicNRosyField, DEFAULT_ORDER};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// Per-face target directions for field generation.
#[derive(Debug, Clone, Default)]
pub struct FieldDirections {
    /// A tangent direction per face.
    pub direction: Vec<Vector3<f64>>,
    /// Whether the face keeps its direction during smoothing.
    pub is_fixed: Vec<bool>,
}

impl FieldDirections {
    /// Number of fixed faces.
    pub fn num_fixed(&self) -> usize {
        self.is_fixed.iter().filter(|f| **f).count()
    }
}

/// The persisted form of a frame field, indexed by face.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameField {
    /// Direction of each face's reference half-edge.
    pub reference_field: Vec<Vector3<f64>>,
    /// Field angle relative to the reference half-edge.
    pub theta: Vec<f64>,
    /// Transport angle across each local edge.
    pub kappa: Vec<[f64; 3]>,
    /// Period jump across each local edge.
    pub period_jump: Vec<[i32; 3]>,
}

impl FrameField {
    /// Number of faces the field covers.
    pub fn num_faces(&self) -> usize {
        self.theta.len()
    }

    /// Check that every per-face array has `num_faces` entries.
    pub fn validate(&self, num_faces: usize) -> Result<()> {
        let lengths = [
            ("field reference directions", self.reference_field.len()),
            ("field angles", self.theta.len()),
            ("field transport angles", self.kappa.len()),
            ("field period jumps", self.period_jump.len()),
        ];
        for (what, len) in lengths {
            if len != num_faces {
                return Err(MeshError::size_mismatch(what, num_faces, len));
            }
        }
        Ok(())
    }

    /// The 3D field direction of each face.
    pub fn directions(&self, normals: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        self.reference_field
            .iter()
            .zip(normals)
            .zip(&self.theta)
            .map(|((r, n), theta)| theta.cos() * r + theta.sin() * n.cross(r))
            .collect()
    }
}

/// Options for curvature-driven field generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    /// Vertex rings gathered around each face for the curvature tensor.
    pub radius: usize,
    /// Minimum eigenvalue gap per unit area, relative to the bounding-box
    /// diagonal, for a face to be fixed.
    pub abs_anisotropy: f64,
    /// Minimum relative eigenvalue gap for a face to be fixed.
    pub rel_anisotropy: f64,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            radius: 5,
            abs_anisotropy: 0.2,
            rel_anisotropy: 0.9,
        }
    }
}

impl FieldOptions {
    /// Set the neighbourhood radius in vertex rings.
    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    /// Set the absolute anisotropy threshold.
    pub fn with_abs_anisotropy(mut self, threshold: f64) -> Self {
        self.abs_anisotropy = threshold;
        self
    }

    /// Set the relative anisotropy threshold.
    pub fn with_rel_anisotropy(mut self, threshold: f64) -> Self {
        self.rel_anisotropy = threshold;
        self
    }
}

/// Wrap an angle to (−π, π].
pub(crate) fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::PI;
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}
