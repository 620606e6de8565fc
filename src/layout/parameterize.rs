//! Integrating a flat metric into per-corner UV coordinates.

use std::collections::VecDeque;

use nalgebra::{Point2, Rotation2, Vector2};

use crate::error::{MeshError, Result};
use crate::mesh::{FaceId, HalfEdgeId, HalfEdgeMesh, UnionFind};
use crate::metric::MarkedPennerConeMetric;

/// Revisit tolerance, relative to the mean edge length.
const LAYOUT_TOLERANCE: f64 = 1e-6;

/// UV coordinates of a laid-out metric.
#[derive(Debug, Clone, Default)]
pub struct MetricLayout {
    /// UV positions, one per corner class.
    pub uv: Vec<Point2<f64>>,
    /// UV vertex of each face corner.
    pub uv_faces: Vec<[usize; 3]>,
    /// Largest distance between two placements of one UV vertex.
    pub max_error: f64,
}

/// Whether the layout may cross the edge of `h`.
fn is_crossing(metric: &MarkedPennerConeMetric, h: HalfEdgeId) -> bool {
    let mesh = metric.mesh();
    !mesh.is_boundary_halfedge(h) && !mesh.is_boundary_halfedge(mesh.twin(h)) && !metric.is_cut(mesh.edge_of(h))
}

/// The third corner of a triangle left of `a → b` with the given side lengths.
fn place_apex(a: Point2<f64>, b: Point2<f64>, l_ab: f64, l_ac: f64, l_bc: f64) -> Point2<f64> {
    let x = (l_ab * l_ab + l_ac * l_ac - l_bc * l_bc) / (2.0 * l_ab);
    let y = (l_ac * l_ac - x * x).max(0.0).sqrt();
    let u = (b - a).try_normalize(0.0).unwrap_or_else(Vector2::x);
    let v = Vector2::new(-u.y, u.x);
    a + x * u + y * v
}

/// Lay out `metric` in the plane, cutting along its boundary and cut edges.
///
/// Corners are merged across every crossable edge and each merged class is
/// one UV vertex. Each connected piece is rotated so that its first mesh
/// boundary edge points along +u, or, with no boundary, so that the field
/// direction `theta` of its root face does. With `check` set, a UV vertex
/// reached at two positions further apart than the tolerance is an error.
pub fn layout_metric(metric: &MarkedPennerConeMetric, theta: &[f64], check: bool) -> Result<MetricLayout> {
    let mesh = metric.mesh();
    if theta.len() != mesh.num_faces() {
        return Err(MeshError::size_mismatch("field angles", mesh.num_faces(), theta.len()));
    }
    let lengths = metric.lengths_at(metric.coords());
    let length = |h: HalfEdgeId| lengths[mesh.edge_of(h).index()];
    let tolerance = LAYOUT_TOLERANCE * lengths.iter().sum::<f64>() / lengths.len().max(1) as f64;

    let mut corners = UnionFind::new(3 * mesh.num_faces());
    for h in mesh.halfedge_ids() {
        let t = mesh.twin(h);
        if h < t && is_crossing(metric, h) {
            corners.union(h.index(), mesh.next(t).index());
            corners.union(mesh.next(h).index(), t.index());
        }
    }
    let (labels, count) = corners.labels();
    let class = |h: HalfEdgeId| labels[h.index()];
    let uv_faces: Vec<[usize; 3]> = (0..mesh.num_faces())
        .map(|f| [labels[3 * f], labels[3 * f + 1], labels[3 * f + 2]])
        .collect();

    let mut uv = vec![Point2::origin(); count];
    let mut placed = vec![false; count];
    let mut visited = vec![false; mesh.num_faces()];
    let mut max_error: f64 = 0.0;
    let mut num_components = 0;

    for root in mesh.face_ids() {
        if visited[root.index()] {
            continue;
        }
        num_components += 1;
        visited[root.index()] = true;
        let [h0, h1, h2] = mesh.face_halfedges(root);
        let a = Point2::origin();
        let b = Point2::new(length(h0), 0.0);
        let c = place_apex(a, b, length(h0), length(h2), length(h1));
        for (h, p) in [(h0, a), (h1, b), (h2, c)] {
            uv[class(h)] = p;
            placed[class(h)] = true;
        }

        let mut component = vec![root];
        let mut queue = VecDeque::from([root]);
        while let Some(f) = queue.pop_front() {
            for h in mesh.face_halfedges(f) {
                if !is_crossing(metric, h) {
                    continue;
                }
                let t = mesh.twin(h);
                let g = mesh.face_of(t);
                if visited[g.index()] {
                    continue;
                }
                visited[g.index()] = true;

                let (next, prev) = (mesh.next(t), mesh.prev(t));
                let apex = place_apex(uv[class(t)], uv[class(next)], length(t), length(prev), length(next));
                let c = class(prev);
                if placed[c] {
                    let error = (uv[c] - apex).norm();
                    max_error = max_error.max(error);
                    if check && error > tolerance {
                        return Err(MeshError::Layout {
                            details: format!("face {} places a vertex {:e} away from its first position", g.index(), error),
                        });
                    }
                } else {
                    uv[c] = apex;
                    placed[c] = true;
                }
                component.push(g);
                queue.push_back(g);
            }
        }

        align_component(mesh, &component, theta, &labels, &mut uv);
    }

    log::info!(
        "laid out {} components with {} uv vertices, max revisit error {:e}",
        num_components,
        count,
        max_error
    );
    Ok(MetricLayout { uv, uv_faces, max_error })
}

/// Rotate one laid-out component into its canonical frame.
fn align_component(mesh: &HalfEdgeMesh, component: &[FaceId], theta: &[f64], labels: &[usize], uv: &mut [Point2<f64>]) {
    let direction = |h: HalfEdgeId| uv[labels[mesh.next(h).index()]] - uv[labels[h.index()]];
    let boundary = component
        .iter()
        .flat_map(|&f| mesh.face_halfedges(f))
        .find(|&h| mesh.is_boundary_halfedge(mesh.twin(h)));
    let angle = match boundary {
        Some(h) => {
            let d = direction(h);
            d.y.atan2(d.x)
        }
        None => {
            let root = component[0];
            let d = direction(mesh.face_halfedge(root, 0));
            d.y.atan2(d.x) + theta[root.index()]
        }
    };

    let rotation = Rotation2::new(-angle);
    let mut classes: Vec<usize> = component
        .iter()
        .flat_map(|&f| mesh.face_halfedges(f))
        .map(|h| labels[h.index()])
        .collect();
    classes.sort_unstable();
    classes.dedup();
    for c in classes {
        uv[c] = rotation * uv[c];
    }
}
