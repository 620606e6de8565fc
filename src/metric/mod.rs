//! Marked Penner cone metrics and their construction from cut meshes.
//!
//! A [`MarkedPennerConeMetric`] stores logarithmic edge coordinates on a cut
//! mesh together with the data the Newton solver drives toward: target cone
//! angles, a rotation form from the frame field, and holonomy targets on a
//! homology basis of dual loops. [`CutMetricGenerator`] builds such a metric
//! from a feature cut mesh and a frame field.

mod constraints;
mod cut;
mod homology;
mod marked;

pub use constraints::{normal_matrix, ConstraintLayout, ConstraintMode, Fingerprint};
pub use cut::{CutMetricGenerator, UnionMetric};
pub use homology::{field_seams, homology_loops};
pub use marked::{is_valid_triangle, triangle_angles, CornerAngles, DualLoop, MarkedPennerConeMetric};

use serde::{Deserialize, Serialize};

/// Options controlling how the marked metric and its constraints are built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkedMetricParameters {
    /// Start from the equilateral metric instead of the embedding lengths.
    pub use_initial_zero: bool,
    /// Drop the holonomy constraints on homology loops.
    pub remove_loop_constraints: bool,
    /// Drop boundary angle constraints (free boundary).
    pub remove_symmetry: bool,
    /// Snap loop targets to multiples of 2π on cone-free tori.
    pub remove_trivial_torus: bool,
    /// Use log-length coordinates (`s = 1`) instead of Penner coordinates (`s = 2`).
    pub use_log_length: bool,
}

impl Default for MarkedMetricParameters {
    fn default() -> Self {
        Self {
            use_initial_zero: false,
            remove_loop_constraints: false,
            remove_symmetry: false,
            remove_trivial_torus: true,
            use_log_length: false,
        }
    }
}

impl MarkedMetricParameters {
    /// Coordinate scale `s` with `l = exp(x / s)`.
    #[inline]
    pub fn scale(&self) -> f64 {
        if self.use_log_length {
            1.0
        } else {
            2.0
        }
    }

    /// Set whether to start from the equilateral metric.
    pub fn with_initial_zero(mut self, enabled: bool) -> Self {
        self.use_initial_zero = enabled;
        self
    }

    /// Set whether to drop the loop holonomy constraints.
    pub fn with_remove_loop_constraints(mut self, enabled: bool) -> Self {
        self.remove_loop_constraints = enabled;
        self
    }

    /// Set whether to drop boundary angle constraints.
    pub fn with_remove_symmetry(mut self, enabled: bool) -> Self {
        self.remove_symmetry = enabled;
        self
    }

    /// Set whether to snap loop targets on cone-free tori.
    pub fn with_remove_trivial_torus(mut self, enabled: bool) -> Self {
        self.remove_trivial_torus = enabled;
        self
    }

    /// Set whether to use log-length coordinates.
    pub fn with_log_length(mut self, enabled: bool) -> Self {
        self.use_log_length = enabled;
        self
    }
}
