//! Connectivity helpers: union-find and connected components.

use std::collections::VecDeque;

use super::halfedge::HalfEdgeMesh;
use super::index::{FaceId, VertexId};

// ============================================================================
// Union-Find
// ============================================================================

/// Disjoint-set forest with path compression and union by rank.
///
/// Used to merge mesh corners across uncut edges and to grow spanning trees.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    /// Create `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Find the representative of the set containing `x`.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets containing `a` and `b`. Returns false if they were already merged.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }

    /// Label every element by its set, numbering sets in order of first appearance.
    ///
    /// Returns the per-element labels and the number of sets.
    pub fn labels(&mut self) -> (Vec<usize>, usize) {
        let n = self.parent.len();
        let mut root_label = vec![usize::MAX; n];
        let mut labels = Vec::with_capacity(n);
        let mut count = 0;
        for i in 0..n {
            let root = self.find(i);
            if root_label[root] == usize::MAX {
                root_label[root] = count;
                count += 1;
            }
            labels.push(root_label[root]);
        }
        (labels, count)
    }
}

// ============================================================================
// Components
// ============================================================================

/// Connected components of a mesh, over faces and vertices.
#[derive(Debug, Clone)]
pub struct Components {
    /// Component label per face.
    pub face_component: Vec<usize>,
    /// Component label per vertex (isolated vertices get their own label).
    pub vertex_component: Vec<usize>,
    /// Number of components.
    pub count: usize,
}

impl Components {
    /// Compute the edge-connected components of a mesh.
    pub fn new(mesh: &HalfEdgeMesh) -> Self {
        let mut face_component = vec![usize::MAX; mesh.num_faces()];
        let mut count = 0;

        for seed in mesh.face_ids() {
            if face_component[seed.index()] != usize::MAX {
                continue;
            }
            face_component[seed.index()] = count;
            let mut queue = VecDeque::from([seed]);
            while let Some(f) = queue.pop_front() {
                for he in mesh.face_halfedges(f) {
                    let g = mesh.face_of(mesh.twin(he));
                    if g.is_valid() && face_component[g.index()] == usize::MAX {
                        face_component[g.index()] = count;
                        queue.push_back(g);
                    }
                }
            }
            count += 1;
        }

        let mut vertex_component = vec![usize::MAX; mesh.num_vertices()];
        for f in mesh.face_ids() {
            for v in mesh.face_triangle(f) {
                vertex_component[v.index()] = face_component[f.index()];
            }
        }
        for label in vertex_component.iter_mut().filter(|c| **c == usize::MAX) {
            *label = count;
            count += 1;
        }

        Self {
            face_component,
            vertex_component,
            count,
        }
    }

    /// Faces of each component, in increasing face order.
    pub fn faces_by_component(&self) -> Vec<Vec<FaceId>> {
        let mut groups = vec![Vec::new(); self.count];
        for (f, &c) in self.face_component.iter().enumerate() {
            groups[c].push(FaceId::new(f));
        }
        groups
    }

    /// Vertices of each component, in increasing vertex order.
    pub fn vertices_by_component(&self) -> Vec<Vec<VertexId>> {
        let mut groups = vec![Vec::new(); self.count];
        for (v, &c) in self.vertex_component.iter().enumerate() {
            groups[c].push(VertexId::new(v));
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, shapes};

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(0, 1));
        assert!(uf.union(3, 4));
        assert!(!uf.union(1, 0));
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(0), uf.find(3));

        let (labels, count) = uf.labels();
        assert_eq!(count, 3);
        assert_eq!(labels, vec![0, 0, 1, 2, 2]);
    }

    #[test]
    fn test_two_components() {
        let (mut vertices, mut faces) = shapes::octahedron();
        let (v2, f2) = shapes::octahedron();
        let offset = vertices.len();
        vertices.extend(v2);
        faces.extend(f2.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));

        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let components = Components::new(&mesh);
        assert_eq!(components.count, 2);
        assert_eq!(components.faces_by_component()[1].len(), 8);
        assert_eq!(components.vertex_component[offset], 1);
    }
}
