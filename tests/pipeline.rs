//! End-to-end scenarios: fields, optimization, checkpoints, and layouts.

use std::collections::HashMap;

use approx::assert_relative_eq;
use nalgebra::Point3;
use penner::io::{load_frame_field, save_frame_field};
use penner::layout::analysis::compute_feature_alignment;
use penner::mesh::shapes;
use penner::metric::{ConstraintMode, CutMetricGenerator};
use penner::optimize::{Checkpoint, IterationMonitor};
use penner::prelude::*;
use penner::session::generate_frame_field;

/// An `n` by `n` unit grid lifted into a Gaussian bump of height `height`.
fn bump(n: usize, height: f64) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let (mut vertices, faces) = shapes::grid(n, n, 1.0, 1.0);
    for p in vertices.iter_mut() {
        let r2 = (p.x - 0.5).powi(2) + (p.y - 0.5).powi(2);
        p.z = height * (-8.0 * r2).exp();
    }
    (vertices, faces)
}

fn bumpy_disk() -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    bump(8, 0.25)
}

/// Fields on the bump follow the boundary only.
fn boundary_aligned() -> FieldOptions {
    FieldOptions::default().with_abs_anisotropy(1e10)
}

fn disk_optimizer() -> MarkedMetricOptimizer {
    let (vertices, faces) = bumpy_disk();
    let features = FeatureEdges::default();
    let field = generate_frame_field(&vertices, &faces, &features, &boundary_aligned()).unwrap();
    let params = MarkedMetricParameters::default().with_remove_symmetry(true);
    MarkedMetricOptimizer::new(&vertices, &faces, &features, field, params).unwrap()
}

fn torus_optimizer() -> MarkedMetricOptimizer {
    let (vertices, faces) = shapes::torus(16, 8, 2.0, 0.7);
    let features = FeatureEdges::default();
    let field = generate_frame_field(&vertices, &faces, &features, &FieldOptions::default()).unwrap();
    let params = MarkedMetricParameters::default().with_remove_loop_constraints(true);
    MarkedMetricOptimizer::new(&vertices, &faces, &features, field, params).unwrap()
}

fn torus_with_loops() -> MarkedMetricOptimizer {
    let (vertices, faces) = shapes::torus(16, 8, 2.0, 0.7);
    let features = FeatureEdges::default();
    let field = generate_frame_field(&vertices, &faces, &features, &FieldOptions::default()).unwrap();
    MarkedMetricOptimizer::new(&vertices, &faces, &features, field, MarkedMetricParameters::default()).unwrap()
}

/// Largest relative length difference between the UV copies of a mesh edge.
fn max_shared_edge_mismatch(param: &Parameterization) -> f64 {
    let mut directed: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
    for (f, face) in param.faces.iter().enumerate() {
        for i in 0..3 {
            directed.insert((face[i], face[(i + 1) % 3]), (f, i));
        }
    }
    let mut worst = 0.0_f64;
    for (&(a, b), &(f, i)) in &directed {
        if let Some(&(g, j)) = directed.get(&(b, a)) {
            let (lf, lg) = (param.uv_edge_length(f, i), param.uv_edge_length(g, j));
            worst = worst.max((lf - lg).abs() / lf.max(lg));
        }
    }
    worst
}

#[test]
fn test_bumpy_disk_flattens() {
    let mut optimizer = disk_optimizer();
    assert!(optimizer.metric().max_interior_angle_error() > 1e-4);

    let newton = NewtonParameters::default().with_max_itr(100);
    let report = optimizer.optimize_full(&newton).unwrap();
    assert_eq!(report.status, NewtonStatus::Converged);
    assert!(report.error < newton.error_eps);
    assert_eq!(optimizer.state(), OptimizerState::Converged);

    optimizer.parameterize(true).unwrap();
    let param = optimizer.get_parameterization().unwrap();
    assert_eq!(param.num_faces(), 128);
    assert_eq!(param.face_map, (0..128).collect::<Vec<_>>());
    assert!(max_shared_edge_mismatch(param) < 1e-6);

    let metric = optimizer.metric();
    let mesh = metric.mesh();
    for f in 0..param.num_faces() {
        for i in 0..3 {
            let e = mesh.edge_of(HalfEdgeId::new(3 * f + i));
            assert_relative_eq!(param.uv_edge_length(f, i), metric.length(e), max_relative = 1e-6);
        }
    }
}

#[test]
fn test_torus_flattens_without_loop_constraints() {
    let mut optimizer = torus_optimizer();
    let newton = NewtonParameters::default().with_max_itr(200);
    let report = optimizer.optimize_full(&newton).unwrap();
    assert!(report.status.is_converged(), "{:?}", report);
    assert!(optimizer.metric().max_interior_angle_error() < 1e-6);

    optimizer.parameterize(false).unwrap();
    let param = optimizer.get_parameterization().unwrap();
    assert!(max_shared_edge_mismatch(param) < 1e-6);
}

#[test]
fn test_torus_with_loop_constraints_converges() {
    let mut optimizer = torus_with_loops();
    assert!(!optimizer.metric().loops().is_empty());
    // a smooth field on the torus has no cones
    for theta in optimizer.metric().th_hat() {
        assert_relative_eq!(*theta, 2.0 * std::f64::consts::PI, epsilon = 1e-9);
    }

    let full = optimizer.optimize_full(&NewtonParameters::default()).unwrap();
    assert!(full.status.is_converged(), "{:?}", full);

    let mut optimizer = torus_with_loops();
    let relaxed = optimizer.optimize_relaxed(&NewtonParameters::default()).unwrap();
    assert!(relaxed.status.is_converged(), "{:?}", relaxed);
    assert!(optimizer.metric().max_interior_angle_error() < 1e-8);
}

#[test]
fn test_relaxed_flattens_bumps_with_default_settings() {
    for height in [0.25, 0.6, 1.0] {
        let (vertices, faces) = bump(10, height);
        let features = FeatureEdges::default();
        let field = generate_frame_field(&vertices, &faces, &features, &FieldOptions::default()).unwrap();
        let mut optimizer =
            MarkedMetricOptimizer::new(&vertices, &faces, &features, field, MarkedMetricParameters::default())
                .unwrap();

        let report = optimizer.optimize_relaxed(&NewtonParameters::default()).unwrap();
        assert!(report.status.is_converged(), "height {}: {:?}", height, report);
        assert!(optimizer.metric().max_interior_angle_error() < 1e-8, "height {}", height);
        optimizer.parameterize(false).unwrap();
    }
}

#[test]
fn test_octahedron_equator_is_feature_aligned() {
    let (vertices, faces) = shapes::octahedron();
    let features = FeatureEdges {
        features: (0..4).map(|i| VertexEdge::new(i, (i + 1) % 4)).collect(),
        hard: Vec::new(),
    };
    let field = generate_frame_field(&vertices, &faces, &features, &FieldOptions::default()).unwrap();
    let params = MarkedMetricParameters::default().with_remove_loop_constraints(true);
    let mut optimizer = MarkedMetricOptimizer::new(&vertices, &faces, &features, field, params).unwrap();

    let newton = NewtonParameters::default().with_max_itr(200).with_error_eps(1e-10);
    let report = optimizer.optimize_full(&newton).unwrap();
    assert!(report.status.is_converged(), "{:?}", report);

    optimizer.parameterize(false).unwrap();
    let param = optimizer.get_parameterization().unwrap();
    let alignment = compute_feature_alignment(&param.faces, &param.uv, &param.uv_faces, &features.features);
    assert_eq!(alignment.len(), 4);
    for a in alignment {
        assert!(a < 1e-6, "feature alignment {}", a);
    }
}

#[test]
fn test_relaxed_then_full_is_no_worse() {
    let mut optimizer = disk_optimizer();
    let newton = NewtonParameters::default().with_max_itr(100);
    let relaxed = optimizer.optimize_relaxed(&newton).unwrap();
    assert!(relaxed.status.is_converged());

    let full = optimizer.optimize_full(&newton).unwrap();
    assert!(full.error <= full.initial_error);
    assert_eq!(full.mode, ConstraintMode::Full);
}

#[test]
fn test_checkpoint_resume_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    // half steps keep the solve long enough to checkpoint mid-way
    let newton = NewtonParameters::default().with_max_itr(100).with_lambda0(0.5);

    let mut uninterrupted = disk_optimizer();
    let reference = uninterrupted.optimize_full(&newton).unwrap();
    assert!(reference.status.is_converged());
    assert!(reference.iterations > 15, "{:?}", reference);

    let mut first = disk_optimizer();
    first.set_monitor(IterationMonitor::stop_after(15));
    let partial = first
        .optimize_full(&newton.clone().with_checkpoints(10, dir.path()))
        .unwrap();
    assert_eq!(partial.status, NewtonStatus::Interrupted);
    assert_eq!(partial.iterations, 15);
    let path = Checkpoint::path_in(dir.path(), ConstraintMode::Full);
    assert_eq!(Checkpoint::load(&path).unwrap().iteration, 10);

    let mut resumed = disk_optimizer();
    resumed.resume_from_checkpoint(&path).unwrap();
    assert_eq!(resumed.state(), OptimizerState::Initialized);
    let report = resumed.optimize_full(&newton).unwrap();
    assert!(report.status.is_converged());
    assert_eq!(report.iterations, reference.iterations);
    assert_eq!(report.error.to_bits(), reference.error.to_bits());
    assert_eq!(resumed.metric().coords(), uninterrupted.metric().coords());
}

#[test]
fn test_checkpoint_from_another_mesh_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk = disk_optimizer();
    disk.optimize_full(&NewtonParameters::default().with_max_itr(1).with_checkpoints(1, dir.path()))
        .unwrap();
    let path = Checkpoint::path_in(dir.path(), ConstraintMode::Full);

    let mut torus = torus_optimizer();
    assert!(matches!(
        torus.resume_from_checkpoint(&path),
        Err(MeshError::CheckpointMismatch { .. })
    ));
    assert_eq!(torus.state(), OptimizerState::Initialized);
}

#[test]
fn test_field_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.ffield");
    let (vertices, faces) = shapes::cube(2);
    let field = generate_frame_field(&vertices, &faces, &FeatureEdges::default(), &FieldOptions::default()).unwrap();

    save_frame_field(&path, &field).unwrap();
    let loaded = load_frame_field(&path).unwrap();
    assert_eq!(loaded, field);
    for (a, b) in loaded.kappa.iter().flatten().zip(field.kappa.iter().flatten()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn test_cone_collapse_preserves_total_index() {
    let (vertices, faces) = shapes::cube(4);
    let finder = FeatureFinder::new(&vertices, &faces).unwrap();
    let cut = finder.generate_feature_cut_mesh().unwrap();
    let options = FieldOptions::default();
    let directions = penner::field::compute_field_direction(
        &cut.vertices,
        &cut.faces,
        options.radius,
        options.abs_anisotropy,
        options.rel_anisotropy,
    )
    .unwrap();

    let mut generator =
        CutMetricGenerator::new(&cut.vertices, &cut.faces, MarkedMetricParameters::default(), &[]).unwrap();
    generator
        .generate_fields(&cut.vertices, &cut.faces, &cut.vertex_map, &directions.direction, &directions.is_fixed)
        .unwrap();

    let before = generator.cone_indices().unwrap();
    let total_before: i32 = before.iter().sum();
    // total index is -N times the Euler characteristic
    assert_eq!(total_before, -8);

    generator.collapse_cones(Some(f64::INFINITY)).unwrap();
    let after = generator.cone_indices().unwrap();
    assert_eq!(after.iter().sum::<i32>(), total_before);
    assert!(after.iter().filter(|&&i| i != 0).count() <= before.iter().filter(|&&i| i != 0).count());
}

#[test]
fn test_parameterization_keeps_input_faces() {
    let mut optimizer = disk_optimizer();
    optimizer.optimize_relaxed(&NewtonParameters::default()).unwrap();
    optimizer.parameterize(false).unwrap();
    let param = optimizer.get_parameterization().unwrap();

    let (vertices, faces) = bumpy_disk();
    assert_eq!(param.faces, faces);
    assert_eq!(param.vertices.len(), vertices.len());
    assert!(param.endpoints.iter().all(Option::is_none));
    assert_eq!(param.components().len(), 1);
    assert!(param.uv_bounding_box().is_some());
}
