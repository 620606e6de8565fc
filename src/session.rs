//! Interactive field editing as explicit commands.
//!
//! A [`Session`] owns a mesh with features, its feature cut, and the frame
//! field on that cut. Each [`Command`] is applied synchronously and returns a
//! [`CommandOutcome`]; nothing is shared between sessions.
//!
//! ```no_run
//! use penner::prelude::*;
//! use penner::mesh::shapes;
//!
//! let (vertices, faces) = shapes::cube(3);
//! let mut session = Session::new(
//!     &vertices,
//!     &faces,
//!     FeatureEdges::default(),
//!     FieldOptions::default(),
//!     MarkedMetricParameters::default(),
//! )
//! .unwrap();
//! session.apply(Command::CollapseCones { max_distance: None }).unwrap();
//! session
//!     .apply(Command::Parameterize { newton: NewtonParameters::default(), full: false })
//!     .unwrap();
//! ```

use std::path::PathBuf;

use nalgebra::Point3;

use crate::error::Result;
use crate::feature::{FeatureCutMesh, FeatureEdges, FeatureFinder};
use crate::field::{compute_field_direction, FieldOptions, FrameField};
use crate::io::save_frame_field;
use crate::layout::Parameterization;
use crate::metric::{CutMetricGenerator, MarkedMetricParameters};
use crate::optimize::{MarkedMetricOptimizer, NewtonParameters, NewtonReport, OptimizerState};

/// Cut a mesh along its features and fit a frame field to its curvature.
///
/// `options.abs_anisotropy` is taken relative to the bounding-box diagonal.
/// The returned field is indexed by input face.
pub fn generate_frame_field(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    features: &FeatureEdges,
    options: &FieldOptions,
) -> Result<FrameField> {
    let (cut, mut generator) = cut_and_generator(vertices, faces, features, MarkedMetricParameters::default())?;
    fit_field(&mut generator, &cut, options)?;
    generator.get_field()
}

fn cut_and_generator(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    features: &FeatureEdges,
    params: MarkedMetricParameters,
) -> Result<(FeatureCutMesh, CutMetricGenerator)> {
    let mut finder = FeatureFinder::new(vertices, faces)?;
    finder.mark_features(&features.features)?;
    let cut = finder.generate_feature_cut_mesh()?;
    let hard = cut.map_edges(&features.hard);
    let generator = CutMetricGenerator::new(&cut.vertices, &cut.faces, params, &hard)?;
    Ok((cut, generator))
}

fn fit_field(generator: &mut CutMetricGenerator, cut: &FeatureCutMesh, options: &FieldOptions) -> Result<()> {
    let bb_diag = generator.embedding().mesh().bounding_box_diagonal();
    let abs_anisotropy = if bb_diag > 0.0 {
        options.abs_anisotropy / bb_diag
    } else {
        options.abs_anisotropy
    };
    let directions = compute_field_direction(
        &cut.vertices,
        &cut.faces,
        options.radius,
        abs_anisotropy,
        options.rel_anisotropy,
    )?;
    log::info!(
        "fitting a field with {} of {} faces fixed",
        directions.num_fixed(),
        cut.faces.len()
    );
    generator.generate_fields(&cut.vertices, &cut.faces, &cut.vertex_map, &directions.direction, &directions.is_fixed)
}

/// An operation on a [`Session`].
#[derive(Debug, Clone)]
pub enum Command {
    /// Refit the field from curvature, discarding edits.
    RecomputeField {
        /// Options for the direction estimate.
        options: FieldOptions,
    },
    /// Cancel cone pairs within `max_distance`, or joined by an edge for `None`.
    CollapseCones {
        /// Longest path between cancelled cones.
        max_distance: Option<f64>,
    },
    /// Optimize a metric for the current field and lay it out.
    Parameterize {
        /// Newton parameters for each solve.
        newton: NewtonParameters,
        /// Run a full solve before the relaxed one.
        full: bool,
    },
    /// Save the current field.
    WriteField {
        /// Destination `.ffield` file.
        path: PathBuf,
    },
}

/// What a [`Command`] did.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The field was refit.
    FieldRecomputed {
        /// Interior vertices with a nonzero index.
        num_cones: usize,
    },
    /// Cone pairs were cancelled.
    ConesCollapsed {
        /// Pairs cancelled.
        pairs: usize,
        /// Cones left.
        num_cones: usize,
    },
    /// A parameterization is available from [`Session::parameterization`].
    Parameterized {
        /// Report of the last solve.
        report: NewtonReport,
    },
    /// The field was written.
    FieldWritten {
        /// File written.
        path: PathBuf,
    },
}

/// Owned pipeline state for field editing and re-solving.
#[derive(Debug)]
pub struct Session {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[usize; 3]>,
    features: FeatureEdges,
    params: MarkedMetricParameters,
    cut: FeatureCutMesh,
    generator: CutMetricGenerator,
    optimizer: Option<MarkedMetricOptimizer>,
}

impl Session {
    /// Start a session with a field fitted to curvature.
    pub fn new(
        vertices: &[Point3<f64>],
        faces: &[[usize; 3]],
        features: FeatureEdges,
        options: FieldOptions,
        params: MarkedMetricParameters,
    ) -> Result<Self> {
        let (cut, mut generator) = cut_and_generator(vertices, faces, &features, params)?;
        fit_field(&mut generator, &cut, &options)?;
        Ok(Self::assemble(vertices, faces, features, params, cut, generator))
    }

    /// Start a session from a saved field.
    pub fn with_field(
        vertices: &[Point3<f64>],
        faces: &[[usize; 3]],
        features: FeatureEdges,
        field: &FrameField,
        params: MarkedMetricParameters,
    ) -> Result<Self> {
        field.validate(faces.len())?;
        let (cut, mut generator) = cut_and_generator(vertices, faces, &features, params)?;
        generator.set_fields(&cut.faces, &field.reference_field, &field.theta, &field.kappa, &field.period_jump)?;
        Ok(Self::assemble(vertices, faces, features, params, cut, generator))
    }

    fn assemble(
        vertices: &[Point3<f64>],
        faces: &[[usize; 3]],
        features: FeatureEdges,
        params: MarkedMetricParameters,
        cut: FeatureCutMesh,
        generator: CutMetricGenerator,
    ) -> Self {
        Self {
            vertices: vertices.to_vec(),
            faces: faces.to_vec(),
            features,
            params,
            cut,
            generator,
            optimizer: None,
        }
    }

    /// The current field, per input face.
    pub fn field(&self) -> Result<FrameField> {
        self.generator.get_field()
    }

    /// Cone index per cut-mesh vertex.
    pub fn cone_indices(&self) -> Result<Vec<i32>> {
        self.generator.cone_indices()
    }

    /// Number of vertices with a nonzero cone index.
    pub fn num_cones(&self) -> Result<usize> {
        Ok(self.cone_indices()?.iter().filter(|&&i| i != 0).count())
    }

    /// The feature cut mesh the field lives on.
    pub fn cut_mesh(&self) -> &FeatureCutMesh {
        &self.cut
    }

    /// State of the optimizer from the last [`Command::Parameterize`].
    pub fn state(&self) -> OptimizerState {
        self.optimizer
            .as_ref()
            .map_or(OptimizerState::Uninitialized, |o| o.state())
    }

    /// The layout from the last [`Command::Parameterize`].
    pub fn parameterization(&self) -> Option<&Parameterization> {
        self.optimizer.as_ref().and_then(|o| o.get_parameterization().ok())
    }

    /// Apply one command.
    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::RecomputeField { options } => {
                fit_field(&mut self.generator, &self.cut, &options)?;
                self.optimizer = None;
                Ok(CommandOutcome::FieldRecomputed {
                    num_cones: self.num_cones()?,
                })
            }
            Command::CollapseCones { max_distance } => {
                let pairs = self.generator.collapse_cones(max_distance)?;
                self.optimizer = None;
                let num_cones = self.num_cones()?;
                log::info!("collapsed {} cone pairs, {} cones left", pairs, num_cones);
                Ok(CommandOutcome::ConesCollapsed { pairs, num_cones })
            }
            Command::Parameterize { newton, full } => {
                let field = self.field()?;
                let mut optimizer =
                    MarkedMetricOptimizer::new(&self.vertices, &self.faces, &self.features, field, self.params)?;
                if full {
                    optimizer.optimize_full(&newton)?;
                }
                let report = optimizer.optimize_relaxed(&newton)?;
                if !report.status.is_converged() {
                    optimizer.accept_best_effort()?;
                }
                optimizer.parameterize(false)?;
                self.optimizer = Some(optimizer);
                Ok(CommandOutcome::Parameterized { report })
            }
            Command::WriteField { path } => {
                save_frame_field(&path, &self.field()?)?;
                Ok(CommandOutcome::FieldWritten { path })
            }
        }
    }
}
