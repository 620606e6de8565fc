//! Cancelling nearby cone pairs by rerouting period jumps.
//!
//! A positive cone `a` and a negative cone `b` with opposite indices are
//! joined by a shortest path of interior edges. Adding `index(a)` to the
//! period jump of every path half-edge moves the index from `a` to `b` and
//! leaves the intermediate vertices unchanged, so both cones vanish and the
//! total index is preserved.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::nrosy::{is_crossing, IntrinsicNRosyField};
use crate::error::{MeshError, Result};
use crate::mesh::{HalfEdgeId, HalfEdgeMesh, VertexId};
use crate::metric::MarkedPennerConeMetric;

/// Entry in the priority queue for Dijkstra's algorithm.
#[derive(Debug, Clone, Copy)]
struct DijkstraEntry {
    distance: f64,
    vertex: VertexId,
}

// BinaryHeap is a max-heap, so order by reversed distance
impl PartialEq for DijkstraEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for DijkstraEntry {}

impl PartialOrd for DijkstraEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DijkstraEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.distance.total_cmp(&self.distance)
    }
}

/// A candidate cancellation: path half-edges from the positive cone.
struct CancelPath {
    distance: f64,
    index: i32,
    halfedges: Vec<HalfEdgeId>,
}

/// Shortest path over interior vertices from `source` to the nearest vertex
/// accepted by `is_target`, within `max_distance` and `max_edges`.
fn nearest_target(
    mesh: &HalfEdgeMesh,
    lengths: &[f64],
    source: VertexId,
    max_distance: f64,
    max_edges: usize,
    is_target: impl Fn(VertexId) -> bool,
) -> Option<(f64, Vec<HalfEdgeId>)> {
    let n = mesh.num_vertices();
    let mut distance = vec![f64::INFINITY; n];
    let mut hops = vec![0usize; n];
    let mut predecessor = vec![HalfEdgeId::invalid(); n];
    let mut heap = BinaryHeap::new();

    distance[source.index()] = 0.0;
    heap.push(DijkstraEntry {
        distance: 0.0,
        vertex: source,
    });

    while let Some(DijkstraEntry { distance: d, vertex: v }) = heap.pop() {
        if d > distance[v.index()] {
            continue;
        }
        if v != source && is_target(v) {
            let mut path = Vec::new();
            let mut w = v;
            while w != source {
                let h = predecessor[w.index()];
                path.push(h);
                w = mesh.origin(h);
            }
            path.reverse();
            return Some((d, path));
        }
        if hops[v.index()] >= max_edges {
            continue;
        }

        for h in mesh.vertex_halfedges(v) {
            if !is_crossing(mesh, h) {
                continue;
            }
            let w = mesh.dest(h);
            if mesh.is_boundary_vertex(w) {
                continue;
            }
            let candidate = d + lengths[mesh.edge_of(h).index()];
            if candidate <= max_distance && candidate < distance[w.index()] {
                distance[w.index()] = candidate;
                hops[w.index()] = hops[v.index()] + 1;
                predecessor[w.index()] = h;
                heap.push(DijkstraEntry {
                    distance: candidate,
                    vertex: w,
                });
            }
        }
    }
    None
}

impl IntrinsicNRosyField {
    /// Cancel cone pairs joined by paths no longer than `max_distance`.
    ///
    /// Returns the number of pairs cancelled. The free field angles are
    /// re-solved with the new period jumps held fixed. If the total index
    /// changes the field is restored and an error returned.
    pub fn collapse_nearby_cones(&mut self, metric: &MarkedPennerConeMetric, max_distance: f64) -> Result<usize> {
        self.collapse(metric, max_distance, usize::MAX)
    }

    /// Cancel cone pairs joined by a single edge.
    pub fn collapse_adjacent_cones(&mut self, metric: &MarkedPennerConeMetric) -> Result<usize> {
        self.collapse(metric, f64::INFINITY, 1)
    }

    fn collapse(&mut self, metric: &MarkedPennerConeMetric, max_distance: f64, max_edges: usize) -> Result<usize> {
        let mesh = metric.mesh();
        let lengths: Vec<f64> = mesh.edge_ids().map(|e| metric.length(e)).collect();
        let mut indices = self.cone_indices(metric);
        let total_before: i32 = indices.iter().sum();
        let saved = (self.theta.clone(), self.period_jump.clone());

        let mut collapsed = 0;
        loop {
            let mut best: Option<CancelPath> = None;
            for a in mesh.vertex_ids().filter(|a| indices[a.index()] > 0) {
                let index = indices[a.index()];
                let found = nearest_target(mesh, &lengths, a, max_distance, max_edges, |b| {
                    indices[b.index()] == -index
                });
                if let Some((distance, halfedges)) = found {
                    if best.as_ref().map_or(true, |b| distance < b.distance) {
                        best = Some(CancelPath {
                            distance,
                            index,
                            halfedges,
                        });
                    }
                }
            }

            let Some(path) = best else { break };
            for &h in &path.halfedges {
                self.period_jump[h.index()] += path.index;
                self.period_jump[mesh.twin(h).index()] -= path.index;
            }
            let a = mesh.origin(path.halfedges[0]);
            let b = mesh.dest(path.halfedges[path.halfedges.len() - 1]);
            indices[a.index()] = 0;
            indices[b.index()] = 0;
            collapsed += 1;
        }

        if collapsed > 0 {
            let total_after = match self.solve_angles(mesh) {
                Ok(()) => self.cone_indices(metric).iter().sum::<i32>(),
                Err(e) => {
                    (self.theta, self.period_jump) = saved;
                    return Err(e);
                }
            };
            if total_after != total_before {
                (self.theta, self.period_jump) = saved;
                return Err(MeshError::InvalidState(format!(
                    "cone collapse changed the total index from {} to {}",
                    total_before, total_after
                )));
            }
        }
        log::info!("collapsed {} cone pairs", collapsed);
        Ok(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldDirections;
    use crate::mesh::{build_from_triangles, shapes};
    use nalgebra::Vector3;

    fn free_field(shape: shapes::FaceVertexMesh) -> (MarkedPennerConeMetric, IntrinsicNRosyField) {
        let (vertices, faces) = shape;
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let metric = MarkedPennerConeMetric::new(mesh, 2.0, false);
        let mut field = IntrinsicNRosyField::default();
        let directions = FieldDirections {
            direction: vec![Vector3::x(); metric.mesh().num_faces()],
            is_fixed: vec![false; metric.mesh().num_faces()],
        };
        field.generate(&metric, &directions).unwrap();
        (metric, field)
    }

    fn inject_cone_pair(metric: &MarkedPennerConeMetric, field: &mut IntrinsicNRosyField) -> (VertexId, VertexId) {
        // a jump along an interior edge moves one unit of index between its endpoints
        let mesh = metric.mesh();
        let indices = field.cone_indices(metric);
        let regular = |v: VertexId| !mesh.is_boundary_vertex(v) && indices[v.index()] == 0;
        let h = mesh
            .halfedge_ids()
            .find(|&h| is_crossing(mesh, h) && regular(mesh.origin(h)) && regular(mesh.dest(h)))
            .unwrap();
        field.period_jump[h.index()] -= 1;
        field.period_jump[mesh.twin(h).index()] += 1;
        field.solve_angles(mesh).unwrap();
        (mesh.origin(h), mesh.dest(h))
    }

    #[test]
    fn test_collapse_adjacent_pair_on_flat_grid() {
        let (metric, mut field) = free_field(shapes::grid(6, 6, 1.0, 1.0));
        assert!(field.cone_indices(&metric).iter().all(|i| *i == 0));

        let (a, b) = inject_cone_pair(&metric, &mut field);
        let indices = field.cone_indices(&metric);
        assert_eq!(indices[a.index()], 1);
        assert_eq!(indices[b.index()], -1);

        assert_eq!(indices.iter().sum::<i32>(), 0);

        assert_eq!(field.collapse_adjacent_cones(&metric).unwrap(), 1);
        let indices = field.cone_indices(&metric);
        assert!(indices.iter().all(|i| *i == 0));
    }

    #[test]
    fn test_injected_pair_on_cube_collapses() {
        let (metric, mut field) = free_field(shapes::cube(3));
        let (a, b) = inject_cone_pair(&metric, &mut field);
        let indices = field.cone_indices(&metric);
        assert_eq!((indices[a.index()], indices[b.index()]), (1, -1));
        assert_eq!(indices.iter().sum::<i32>(), -8);

        assert!(field.collapse_nearby_cones(&metric, f64::INFINITY).unwrap() >= 1);
        let indices = field.cone_indices(&metric);
        assert_eq!(indices.iter().sum::<i32>(), -8);
        assert!(indices.iter().all(|i| *i <= 0));
        assert_eq!(indices.iter().filter(|i| **i != 0).count(), 8);
    }

    #[test]
    fn test_collapse_respects_distance() {
        let (metric, mut field) = free_field(shapes::grid(6, 6, 1.0, 1.0));
        inject_cone_pair(&metric, &mut field);

        assert_eq!(field.collapse_nearby_cones(&metric, 1e-6).unwrap(), 0);
        assert_eq!(field.collapse_nearby_cones(&metric, 100.0).unwrap(), 1);
    }

    #[test]
    fn test_collapse_preserves_total_index() {
        let (metric, mut field) = free_field(shapes::cube(3));
        let before: i32 = field.cone_indices(&metric).iter().sum();
        field.collapse_nearby_cones(&metric, f64::INFINITY).unwrap();
        let after: i32 = field.cone_indices(&metric).iter().sum();
        assert_eq!(before, -8);
        assert_eq!(after, before);
    }
}
