//! Small procedural meshes used by tests, benchmarks, and examples in docs.
//!
//! Every generator returns a face-vertex pair with consistently oriented,
//! outward-facing triangles.

use std::collections::HashMap;
use std::f64::consts::PI;

use nalgebra::Point3;

/// Face-vertex mesh data.
pub type FaceVertexMesh = (Vec<Point3<f64>>, Vec<[usize; 3]>);

/// A planar `nx` by `ny` grid of quads split into triangles, spanning `width` by `height`.
pub fn grid(nx: usize, ny: usize, width: f64, height: f64) -> FaceVertexMesh {
    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            vertices.push(Point3::new(
                width * i as f64 / nx as f64,
                height * j as f64 / ny as f64,
                0.0,
            ));
        }
    }

    let index = |i: usize, j: usize| j * (nx + 1) + i;
    let mut faces = Vec::with_capacity(2 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let (a, b, c, d) = (index(i, j), index(i + 1, j), index(i + 1, j + 1), index(i, j + 1));
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }
    (vertices, faces)
}

/// The regular octahedron with vertices on the coordinate axes.
///
/// Vertices 0-3 form the equator in the xy-plane, 4 is the north pole and 5
/// the south pole.
pub fn octahedron() -> FaceVertexMesh {
    let vertices = vec![
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(-1.0, 0.0, 0.0),
        Point3::new(0.0, -1.0, 0.0),
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(0.0, 0.0, -1.0),
    ];
    let faces = vec![
        [0, 1, 4],
        [1, 2, 4],
        [2, 3, 4],
        [3, 0, 4],
        [1, 0, 5],
        [2, 1, 5],
        [3, 2, 5],
        [0, 3, 5],
    ];
    (vertices, faces)
}

/// The unit cube centered at the origin, each side split into `n` by `n` quads.
pub fn cube(n: usize) -> FaceVertexMesh {
    let n = n.max(1);
    let mut index: HashMap<[usize; 3], usize> = HashMap::new();
    let mut vertices = Vec::new();
    let mut faces = Vec::with_capacity(12 * n * n);

    let mut vertex = |lattice: [usize; 3], vertices: &mut Vec<Point3<f64>>| -> usize {
        *index.entry(lattice).or_insert_with(|| {
            vertices.push(Point3::new(
                lattice[0] as f64 / n as f64 - 0.5,
                lattice[1] as f64 / n as f64 - 0.5,
                lattice[2] as f64 / n as f64 - 0.5,
            ));
            vertices.len() - 1
        })
    };

    for axis in 0..3 {
        let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);
        for side in [0, n] {
            for i in 0..n {
                for j in 0..n {
                    let mut corner = |di: usize, dj: usize, vertices: &mut Vec<Point3<f64>>| {
                        let mut lattice = [0; 3];
                        lattice[axis] = side;
                        lattice[b] = i + di;
                        lattice[c] = j + dj;
                        vertex(lattice, vertices)
                    };
                    let p00 = corner(0, 0, &mut vertices);
                    let p10 = corner(1, 0, &mut vertices);
                    let p11 = corner(1, 1, &mut vertices);
                    let p01 = corner(0, 1, &mut vertices);
                    if side == n {
                        faces.push([p00, p10, p11]);
                        faces.push([p00, p11, p01]);
                    } else {
                        faces.push([p00, p11, p10]);
                        faces.push([p00, p01, p11]);
                    }
                }
            }
        }
    }
    (vertices, faces)
}

/// A torus of revolution about the z-axis with `nu` by `nv` quads.
pub fn torus(nu: usize, nv: usize, major_radius: f64, minor_radius: f64) -> FaceVertexMesh {
    let mut vertices = Vec::with_capacity(nu * nv);
    for i in 0..nu {
        let u = 2.0 * PI * i as f64 / nu as f64;
        for j in 0..nv {
            let v = 2.0 * PI * j as f64 / nv as f64;
            let radius = major_radius + minor_radius * v.cos();
            vertices.push(Point3::new(radius * u.cos(), radius * u.sin(), minor_radius * v.sin()));
        }
    }

    let index = |i: usize, j: usize| (i % nu) * nv + (j % nv);
    let mut faces = Vec::with_capacity(2 * nu * nv);
    for i in 0..nu {
        for j in 0..nv {
            let (a, b, c, d) = (index(i, j), index(i + 1, j), index(i + 1, j + 1), index(i, j + 1));
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }
    (vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;

    #[test]
    fn test_cube_is_closed_sphere() {
        let (vertices, faces) = cube(2);
        assert_eq!(vertices.len(), 26);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_eq!(mesh.num_boundary_loops(), 0);

        // outward orientation: normals point away from the center
        for f in mesh.face_ids() {
            let centroid = mesh.face_positions(f).iter().fold(nalgebra::Vector3::zeros(), |acc, p| acc + p.coords) / 3.0;
            assert!(mesh.face_normal(f).dot(&centroid) > 0.0);
        }
    }

    #[test]
    fn test_torus_genus_one() {
        let (vertices, faces) = torus(8, 6, 2.0, 0.7);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        assert_eq!(mesh.euler_characteristic(), 0);
        assert!(mesh.is_valid());
    }

    #[test]
    fn test_grid_is_disk() {
        let (vertices, faces) = grid(3, 2, 3.0, 2.0);
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        assert_eq!(mesh.euler_characteristic(), 1);
        assert_eq!(mesh.num_boundary_loops(), 1);
    }
}
