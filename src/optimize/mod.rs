//! Optimizing a marked metric until it is flat away from its cones.
//!
//! [`MarkedMetricOptimizer`] owns the whole pipeline from an input mesh with
//! features and a frame field to a seamless parameterization:
//!
//! 1. split feature chords, carrying the field onto the refined faces
//! 2. cut along the features and build the marked metric
//! 3. run Newton in relaxed and/or full mode
//! 4. lay the converged metric out in the plane
//!
//! # State machine
//!
//! ```text
//! Initialized ──optimize──▶ Relaxing / FullOptimizing ──▶ Converged ──parameterize──▶ Parameterized
//!                                      │
//!                                      └──▶ Failed ──accept_best_effort──▶ (parameterize allowed)
//! ```
//!
//! Optimization may run again from any state after construction, starting
//! from the current iterate.

mod checkpoint;
mod monitor;
mod newton;
mod params;

pub use checkpoint::{Checkpoint, CHECKPOINT_VERSION};
pub use monitor::{IterationMonitor, IterationReport, MonitorAction};
pub use newton::{NewtonReport, NewtonStatus};
pub use params::NewtonParameters;

use std::path::Path;

use nalgebra::{DVector, Point3, Vector3};

use crate::error::{MeshError, Result};
use crate::feature::{refine_feature_chords, FeatureCutMesh, FeatureEdges, FeatureFinder, RefinedFeatureMesh};
use crate::field::FrameField;
use crate::layout::{layout_metric, Parameterization};
use crate::metric::{
    ConstraintLayout, ConstraintMode, CutMetricGenerator, MarkedMetricParameters, MarkedPennerConeMetric, UnionMetric,
};
use newton::{newton_solve, StartPoint};

/// Largest interior angle error accepted as flat.
const FLATNESS_TOLERANCE: f64 = 1e-6;

/// Where an optimizer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerState {
    /// No metric has been built.
    #[default]
    Uninitialized,
    /// The metric is built and no solve has run.
    Initialized,
    /// A relaxed solve is running.
    Relaxing,
    /// A full solve is running.
    FullOptimizing,
    /// The last solve converged.
    Converged,
    /// The last solve ended without converging.
    Failed,
    /// A layout has been computed.
    Parameterized,
}

/// A checkpoint waiting for the next solve in its mode.
#[derive(Debug, Clone, Copy)]
struct PendingResume {
    mode: ConstraintMode,
    start: StartPoint,
}

/// Builds, optimizes, and lays out the marked metric of a mesh with features.
#[derive(Debug)]
pub struct MarkedMetricOptimizer {
    refined: RefinedFeatureMesh,
    cut: FeatureCutMesh,
    generator: CutMetricGenerator,
    union: UnionMetric,
    params: MarkedMetricParameters,
    state: OptimizerState,
    best_effort: bool,
    monitor: Option<IterationMonitor>,
    pending_resume: Option<PendingResume>,
    last_report: Option<NewtonReport>,
    parameterization: Option<Parameterization>,
}

/// Normal of each face of a face-vertex mesh.
fn face_normals(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Vec<Vector3<f64>> {
    faces
        .iter()
        .map(|f| {
            let n = (vertices[f[1]] - vertices[f[0]]).cross(&(vertices[f[2]] - vertices[f[0]]));
            n.try_normalize(0.0).unwrap_or_else(Vector3::z)
        })
        .collect()
}

impl MarkedMetricOptimizer {
    /// Build the marked metric for a mesh, its features, and a frame field.
    ///
    /// If feature chords remain they are split first, and the field is
    /// regenerated on the refined mesh with every face fixed to the
    /// direction of its parent face.
    pub fn new(
        vertices: &[Point3<f64>],
        faces: &[[usize; 3]],
        features: &FeatureEdges,
        field: FrameField,
        params: MarkedMetricParameters,
    ) -> Result<Self> {
        field.validate(faces.len())?;
        let refined = refine_feature_chords(vertices, faces, features)?;

        let mut finder = FeatureFinder::new(&refined.vertices, &refined.faces)?;
        finder.mark_features(&refined.feature_edges)?;
        let cut = finder.generate_feature_cut_mesh()?;
        let hard = cut.map_edges(&refined.hard_feature_edges);
        let mut generator = CutMetricGenerator::new(&cut.vertices, &cut.faces, params, &hard)?;

        if refined.num_inserted() > 0 {
            let directions = field.directions(&face_normals(vertices, faces));
            let refined_directions: Vec<Vector3<f64>> =
                refined.face_parents.iter().map(|&p| directions[p]).collect();
            let is_fixed = vec![true; refined.faces.len()];
            generator.generate_fields(&cut.vertices, &cut.faces, &cut.vertex_map, &refined_directions, &is_fixed)?;
            log::info!("regenerated the field on {} refined faces", refined.faces.len());
        } else {
            generator.set_fields(&cut.faces, &field.reference_field, &field.theta, &field.kappa, &field.period_jump)?;
        }

        let union = generator.get_union_metric(&params)?;
        Ok(Self {
            refined,
            cut,
            generator,
            union,
            params,
            state: OptimizerState::Initialized,
            best_effort: false,
            monitor: None,
            pending_resume: None,
            last_report: None,
            parameterization: None,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// The metric being optimized.
    pub fn metric(&self) -> &MarkedPennerConeMetric {
        &self.union.metric
    }

    /// The union metric with its reindexing and field data.
    pub fn union_metric(&self) -> &UnionMetric {
        &self.union
    }

    /// The refined input mesh.
    pub fn refined_mesh(&self) -> &RefinedFeatureMesh {
        &self.refined
    }

    /// The feature cut of the refined mesh.
    pub fn cut_mesh(&self) -> &FeatureCutMesh {
        &self.cut
    }

    /// The field the metric was built from, per refined face.
    pub fn field(&self) -> Result<FrameField> {
        self.generator.get_field()
    }

    /// Report of the most recent solve.
    pub fn last_report(&self) -> Option<&NewtonReport> {
        self.last_report.as_ref()
    }

    /// Install a callback run once per Newton iteration.
    pub fn set_monitor(&mut self, monitor: IterationMonitor) {
        self.monitor = Some(monitor);
    }

    /// Remove the iteration callback.
    pub fn clear_monitor(&mut self) {
        self.monitor = None;
    }

    /// Constraint layout for `mode` on the current metric.
    pub fn constraints(&self, mode: ConstraintMode) -> ConstraintLayout {
        ConstraintLayout::new(&self.union.metric, mode, &self.params)
    }

    /// Solve with every vertex and loop constraint.
    pub fn optimize_full(&mut self, params: &NewtonParameters) -> Result<NewtonReport> {
        self.optimize(ConstraintMode::Full, params)
    }

    /// Solve without angle constraints on boundary vertices off hard features.
    pub fn optimize_relaxed(&mut self, params: &NewtonParameters) -> Result<NewtonReport> {
        self.optimize(ConstraintMode::Relaxed, params)
    }

    fn optimize(&mut self, mode: ConstraintMode, params: &NewtonParameters) -> Result<NewtonReport> {
        if self.state == OptimizerState::Uninitialized {
            return Err(MeshError::InvalidState("optimizer has no metric".to_string()));
        }
        let layout = self.constraints(mode);
        let start = match self.pending_resume {
            Some(pending) if pending.mode == mode => {
                self.pending_resume = None;
                Some(pending.start)
            }
            _ => None,
        };

        self.state = match mode {
            ConstraintMode::Full => OptimizerState::FullOptimizing,
            ConstraintMode::Relaxed => OptimizerState::Relaxing,
        };
        self.best_effort = false;
        self.parameterization = None;

        let result = newton_solve(&mut self.union.metric, &layout, params, self.monitor.as_ref(), start);
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.state = OptimizerState::Failed;
                return Err(e);
            }
        };
        self.state = if report.status.is_converged() {
            OptimizerState::Converged
        } else {
            OptimizerState::Failed
        };
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Load a checkpoint written by an earlier solve on the same metric.
    ///
    /// The coordinates are applied immediately. The next solve in the
    /// checkpoint's mode continues its iteration count and step size.
    pub fn resume_from_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::load(path.as_ref())?;
        let expected = self.constraints(checkpoint.mode).fingerprint(&self.union.metric);
        if let Some(reason) = expected.mismatch(&checkpoint.fingerprint) {
            return Err(MeshError::CheckpointMismatch { reason });
        }

        let coords = DVector::from_vec(checkpoint.coords);
        if !self.union.metric.is_valid_coords(&coords) {
            return Err(MeshError::CheckpointMismatch {
                reason: "coordinates violate the triangle inequality".to_string(),
            });
        }
        self.union.metric.set_coords(coords)?;
        self.pending_resume = Some(PendingResume {
            mode: checkpoint.mode,
            start: StartPoint {
                iteration: checkpoint.iteration,
                lambda: checkpoint.lambda,
                pinned: checkpoint.pinned,
            },
        });
        self.state = OptimizerState::Initialized;
        self.parameterization = None;
        log::info!(
            "resumed {} solve at iteration {} with error {:e}",
            checkpoint.mode,
            checkpoint.iteration,
            checkpoint.error
        );
        Ok(())
    }

    /// Allow parameterizing the best iterate of a failed solve.
    pub fn accept_best_effort(&mut self) -> Result<()> {
        if self.state != OptimizerState::Failed {
            return Err(MeshError::InvalidState(format!(
                "best effort can only be accepted after a failed solve, not in {:?}",
                self.state
            )));
        }
        log::warn!("accepting a non-converged metric");
        self.best_effort = true;
        Ok(())
    }

    /// Lay out the metric.
    ///
    /// With `check` set, the interior angle error must be below tolerance and
    /// every UV vertex must be placed consistently.
    pub fn parameterize(&mut self, check: bool) -> Result<()> {
        let ready = match self.state {
            OptimizerState::Converged | OptimizerState::Parameterized => true,
            OptimizerState::Failed => self.best_effort,
            _ => false,
        };
        if !ready {
            return Err(MeshError::InvalidState(format!(
                "cannot parameterize in state {:?}",
                self.state
            )));
        }

        let metric = &self.union.metric;
        if check {
            let error = metric.max_interior_angle_error();
            if error > FLATNESS_TOLERANCE {
                return Err(MeshError::Layout {
                    details: format!("metric is not flat: interior angle error {:e}", error),
                });
            }
        }

        let layout = layout_metric(metric, &self.union.theta, check)?;
        let face_map = self.union.face_reindex.iter().map(|&f| self.refined.face_parents[f]).collect();
        let faces = self.union.face_reindex.iter().map(|&f| self.refined.faces[f]).collect();
        self.parameterization = Some(Parameterization {
            vertices: self.refined.vertices.clone(),
            faces,
            uv: layout.uv,
            uv_faces: layout.uv_faces,
            face_map,
            endpoints: self.refined.endpoints.clone(),
        });
        self.state = OptimizerState::Parameterized;
        Ok(())
    }

    /// The layout computed by [`MarkedMetricOptimizer::parameterize`].
    pub fn get_parameterization(&self) -> Result<&Parameterization> {
        self.parameterization
            .as_ref()
            .ok_or_else(|| MeshError::InvalidState("parameterize has not been run".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::VertexEdge;
    use crate::field::FieldOptions;
    use crate::mesh::shapes;
    use crate::session::generate_frame_field;

    fn octahedron_equator() -> (Vec<Point3<f64>>, Vec<[usize; 3]>, FeatureEdges) {
        let (vertices, faces) = shapes::octahedron();
        let features = FeatureEdges {
            features: (0..4).map(|i| VertexEdge::new(i, (i + 1) % 4)).collect(),
            hard: Vec::new(),
        };
        (vertices, faces, features)
    }

    fn optimizer() -> MarkedMetricOptimizer {
        let (vertices, faces, features) = octahedron_equator();
        let field = generate_frame_field(&vertices, &faces, &features, &FieldOptions::default()).unwrap();
        let params = MarkedMetricParameters::default().with_remove_loop_constraints(true);
        MarkedMetricOptimizer::new(&vertices, &faces, &features, field, params).unwrap()
    }

    #[test]
    fn test_new_is_initialized() {
        let optimizer = optimizer();
        assert_eq!(optimizer.state(), OptimizerState::Initialized);
        assert_eq!(optimizer.refined_mesh().num_inserted(), 0);
        assert_eq!(optimizer.metric().mesh().num_vertices(), 10);
    }

    #[test]
    fn test_parameterize_requires_convergence() {
        let mut optimizer = optimizer();
        assert!(matches!(optimizer.parameterize(false), Err(MeshError::InvalidState(_))));
        assert!(matches!(optimizer.get_parameterization(), Err(MeshError::InvalidState(_))));
        assert!(matches!(optimizer.accept_best_effort(), Err(MeshError::InvalidState(_))));
    }

    /// A curved disk whose initial metric is far from flat.
    fn bump_optimizer() -> MarkedMetricOptimizer {
        let (mut vertices, faces) = shapes::grid(6, 6, 1.0, 1.0);
        for p in vertices.iter_mut() {
            let r2 = (p.x - 0.5).powi(2) + (p.y - 0.5).powi(2);
            p.z = 0.3 * (-8.0 * r2).exp();
        }
        let features = FeatureEdges::default();
        let options = FieldOptions::default().with_abs_anisotropy(1e10);
        let field = generate_frame_field(&vertices, &faces, &features, &options).unwrap();
        let params = MarkedMetricParameters::default().with_remove_symmetry(true);
        MarkedMetricOptimizer::new(&vertices, &faces, &features, field, params).unwrap()
    }

    #[test]
    fn test_best_effort_after_failure() {
        let mut optimizer = bump_optimizer();
        let newton = NewtonParameters::default().with_max_itr(1);
        let report = optimizer.optimize_full(&newton).unwrap();
        assert!(report.initial_error > 1e-3);
        assert_eq!(report.status, NewtonStatus::MaxIterations);
        assert_eq!(optimizer.state(), OptimizerState::Failed);
        optimizer.accept_best_effort().unwrap();
        optimizer.parameterize(false).unwrap();
        assert_eq!(optimizer.state(), OptimizerState::Parameterized);
    }

    #[test]
    fn test_mismatched_field_is_rejected() {
        let (vertices, faces, features) = octahedron_equator();
        let field = FrameField::default();
        assert!(matches!(
            MarkedMetricOptimizer::new(&vertices, &faces, &features, field, MarkedMetricParameters::default()),
            Err(MeshError::SizeMismatch { .. })
        ));
    }
}
