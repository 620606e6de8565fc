//! Tree-cotree homology loops and field seams.

use std::collections::VecDeque;

use crate::mesh::{EdgeId, FaceId, HalfEdgeId, HalfEdgeMesh, UnionFind, VertexId};

/// Breadth-first dual spanning forest over faces.
///
/// `up[f]` is the half-edge of `f` crossed to reach the parent face, and is
/// invalid at component roots.
struct DualTree {
    up: Vec<HalfEdgeId>,
    depth: Vec<usize>,
}

impl DualTree {
    fn build(mesh: &HalfEdgeMesh, blocked: impl Fn(EdgeId) -> bool) -> Self {
        let mut up = vec![HalfEdgeId::invalid(); mesh.num_faces()];
        let mut depth = vec![usize::MAX; mesh.num_faces()];

        for root in mesh.face_ids() {
            if depth[root.index()] != usize::MAX {
                continue;
            }
            depth[root.index()] = 0;
            let mut queue = VecDeque::from([root]);
            while let Some(f) = queue.pop_front() {
                for h in mesh.face_halfedges(f) {
                    let t = mesh.twin(h);
                    if mesh.is_boundary_halfedge(t) || blocked(mesh.edge_of(h)) {
                        continue;
                    }
                    let g = mesh.face_of(t);
                    if depth[g.index()] == usize::MAX {
                        depth[g.index()] = depth[f.index()] + 1;
                        up[g.index()] = t;
                        queue.push_back(g);
                    }
                }
            }
        }

        Self { up, depth }
    }

    fn parent(&self, mesh: &HalfEdgeMesh, f: FaceId) -> FaceId {
        mesh.face_of(mesh.twin(self.up[f.index()]))
    }

    fn is_tree_edge(&self, mesh: &HalfEdgeMesh, h: HalfEdgeId) -> bool {
        let f = mesh.face_of(h);
        let g = mesh.face_of(mesh.twin(h));
        (f.is_valid() && self.up[f.index()] == h)
            || (g.is_valid() && self.up[g.index()] == mesh.twin(h))
    }

    /// Crossings from `f` and `g` up to their lowest common ancestor.
    fn paths_to_ancestor(&self, mesh: &HalfEdgeMesh, mut f: FaceId, mut g: FaceId) -> (Vec<HalfEdgeId>, Vec<HalfEdgeId>) {
        let mut from_f = Vec::new();
        let mut from_g = Vec::new();
        while f != g {
            if self.depth[f.index()] >= self.depth[g.index()] {
                from_f.push(self.up[f.index()]);
                f = self.parent(mesh, f);
            } else {
                from_g.push(self.up[g.index()]);
                g = self.parent(mesh, g);
            }
        }
        (from_f, from_g)
    }
}

/// Compute a homology basis of dual loops with tree-cotree.
///
/// The primal spanning forest takes boundary edges first so that loops around
/// boundary components are excluded; a surface of genus `g` then yields
/// exactly `2g` loops per component.
pub fn homology_loops(mesh: &HalfEdgeMesh) -> Vec<Vec<HalfEdgeId>> {
    let mut in_primal = vec![false; mesh.num_edges()];
    let mut forest = UnionFind::new(mesh.num_vertices());
    let boundary_first = mesh
        .edge_ids()
        .filter(|&e| mesh.is_boundary_edge(e))
        .chain(mesh.edge_ids().filter(|&e| !mesh.is_boundary_edge(e)));
    for e in boundary_first {
        let h = mesh.edge_halfedge(e);
        if forest.union(mesh.origin(h).index(), mesh.dest(h).index()) {
            in_primal[e.index()] = true;
        }
    }

    let tree = DualTree::build(mesh, |e| in_primal[e.index()]);

    let mut loops = Vec::new();
    for e in mesh.edge_ids() {
        if in_primal[e.index()] || mesh.is_boundary_edge(e) {
            continue;
        }
        let h = mesh.edge_halfedge(e);
        if tree.is_tree_edge(mesh, h) {
            continue;
        }

        let f = mesh.face_of(h);
        let g = mesh.face_of(mesh.twin(h));
        let (from_f, from_g) = tree.paths_to_ancestor(mesh, f, g);

        let mut halfedges = Vec::with_capacity(1 + from_f.len() + from_g.len());
        halfedges.push(h);
        halfedges.extend(from_g);
        halfedges.extend(from_f.iter().rev().map(|&u| mesh.twin(u)));
        loops.push(halfedges);
    }

    log::debug!("found {} homology loops", loops.len());
    loops
}

/// Compute field seams: a cut graph that reduces each component to a disk.
///
/// Seams are the interior edges outside a dual spanning tree, with dangling
/// branches removed back to cones, boundary, or cycles. Returns a flag per
/// edge.
pub fn field_seams(mesh: &HalfEdgeMesh, is_cone: &[bool]) -> Vec<bool> {
    let tree = DualTree::build(mesh, |_| false);

    let mut is_seam: Vec<bool> = mesh
        .edge_ids()
        .map(|e| !mesh.is_boundary_edge(e) && !tree.is_tree_edge(mesh, mesh.edge_halfedge(e)))
        .collect();

    let mut degree = vec![0usize; mesh.num_vertices()];
    for e in mesh.edge_ids().filter(|e| is_seam[e.index()]) {
        let h = mesh.edge_halfedge(e);
        degree[mesh.origin(h).index()] += 1;
        degree[mesh.dest(h).index()] += 1;
    }

    let prunable = |v: VertexId| !mesh.is_boundary_vertex(v) && !is_cone[v.index()];
    let mut queue: VecDeque<VertexId> = mesh
        .vertex_ids()
        .filter(|&v| degree[v.index()] == 1 && prunable(v))
        .collect();

    while let Some(v) = queue.pop_front() {
        if degree[v.index()] != 1 {
            continue;
        }
        let Some(h) = mesh
            .vertex_halfedges(v)
            .find(|&h| is_seam[mesh.edge_of(h).index()])
        else {
            continue;
        };
        is_seam[mesh.edge_of(h).index()] = false;
        degree[v.index()] = 0;
        let w = mesh.dest(h);
        degree[w.index()] -= 1;
        if degree[w.index()] == 1 && prunable(w) {
            queue.push_back(w);
        }
    }

    is_seam
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, shapes};

    fn assert_closed_loop(mesh: &HalfEdgeMesh, halfedges: &[HalfEdgeId]) {
        for i in 0..halfedges.len() {
            let next = halfedges[(i + 1) % halfedges.len()];
            assert_eq!(mesh.face_of(mesh.twin(halfedges[i])), mesh.face_of(next));
        }
    }

    #[test]
    fn test_sphere_has_no_loops() {
        let (vertices, faces) = shapes::octahedron();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        assert!(homology_loops(&mesh).is_empty());
    }

    #[test]
    fn test_torus_has_two_loops() {
        let (vertices, faces) = shapes::torus(8, 6, 3.0, 1.0);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let loops = homology_loops(&mesh);
        assert_eq!(loops.len(), 2);
        for l in &loops {
            assert_closed_loop(&mesh, l);
        }
    }

    #[test]
    fn test_disk_has_no_loops_or_seams() {
        let (vertices, faces) = shapes::grid(4, 3, 1.0, 1.0);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        assert!(homology_loops(&mesh).is_empty());

        let seams = field_seams(&mesh, &vec![false; mesh.num_vertices()]);
        assert!(seams.iter().all(|s| !s));
    }

    #[test]
    fn test_sphere_seams_connect_cones() {
        let (vertices, faces) = shapes::octahedron();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let is_cone = vec![true; mesh.num_vertices()];
        let seams = field_seams(&mesh, &is_cone);

        // the complement of a dual spanning tree on a sphere is a primal spanning tree
        assert_eq!(seams.iter().filter(|s| **s).count(), mesh.num_vertices() - 1);
    }

    #[test]
    fn test_sphere_seams_prune_without_cones() {
        let (vertices, faces) = shapes::octahedron();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let seams = field_seams(&mesh, &vec![false; mesh.num_vertices()]);
        assert!(seams.iter().all(|s| !s));
    }
}
