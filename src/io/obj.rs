//! Wavefront OBJ support with texture coordinates and edge records.
//!
//! Reads `v`, `vt`, `f` and `l` records. Faces may use the `v`, `v/vt`,
//! `v//vn` and `v/vt/vn` forms, negative (relative) indices, and more than
//! three corners, which are fan triangulated. Normals and every other record
//! are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::{Point2, Point3};

use crate::error::{MeshError, Result};
use crate::feature::VertexEdge;
use crate::layout::Parameterization;

/// Contents of an OBJ file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjMesh {
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,
    /// Triangles in vertex indices.
    pub faces: Vec<[usize; 3]>,
    /// Texture coordinates.
    pub uv: Vec<Point2<f64>>,
    /// Triangles in texture coordinate indices; empty unless every face has them.
    pub uv_faces: Vec<[usize; 3]>,
    /// Edges from `l` records.
    pub edges: Vec<VertexEdge>,
}

impl ObjMesh {
    /// A mesh without texture coordinates or edges.
    pub fn from_triangles(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Self {
        Self {
            vertices: vertices.to_vec(),
            faces: faces.to_vec(),
            ..Self::default()
        }
    }

    /// The mesh and UV layout of a parameterization.
    pub fn from_parameterization(param: &Parameterization) -> Self {
        Self {
            vertices: param.vertices.clone(),
            faces: param.faces.clone(),
            uv: param.uv.clone(),
            uv_faces: param.uv_faces.clone(),
            edges: Vec::new(),
        }
    }

    /// Whether every face has texture coordinates.
    pub fn has_uv(&self) -> bool {
        !self.uv_faces.is_empty() && self.uv_faces.len() == self.faces.len()
    }
}

/// Resolve a one-based or negative OBJ index against `count` elements.
fn resolve_index(token: &str, count: usize) -> std::result::Result<usize, String> {
    let index: i64 = token.parse().map_err(|_| format!("invalid index '{}'", token))?;
    let resolved = match index {
        0 => return Err("index 0 is not valid in OBJ".to_string()),
        i if i > 0 => i as usize - 1,
        i => {
            let back = i.unsigned_abs() as usize;
            if back > count {
                return Err(format!("relative index {} before the first element", i));
            }
            count - back
        }
    };
    if resolved >= count {
        return Err(format!("index {} out of range ({} defined)", index, count));
    }
    Ok(resolved)
}

fn parse_floats<const N: usize>(parts: &mut std::str::SplitWhitespace<'_>) -> std::result::Result<[f64; N], String> {
    let mut values = [0.0; N];
    for value in values.iter_mut() {
        let token = parts.next().ok_or("missing coordinate")?;
        *value = token.parse().map_err(|_| format!("invalid number '{}'", token))?;
    }
    Ok(values)
}

/// Parse OBJ text, reporting errors with their line number.
fn read<R: BufRead>(reader: R) -> std::result::Result<ObjMesh, (usize, String)> {
    let mut mesh = ObjMesh::default();
    let mut uv_faces = Vec::new();
    let mut all_faces_have_uv = true;

    for (line_index, line) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.map_err(|e| (line_number, e.to_string()))?;
        let fail = |message: String| (line_number, message);
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let [x, y, z] = parse_floats::<3>(&mut parts).map_err(fail)?;
                mesh.vertices.push(Point3::new(x, y, z));
            }
            Some("vt") => {
                let [u, v] = parse_floats::<2>(&mut parts).map_err(fail)?;
                mesh.uv.push(Point2::new(u, v));
            }
            Some("f") => {
                let mut corners = Vec::new();
                let mut tex = Vec::new();
                for token in parts {
                    let mut fields = token.split('/');
                    let v = fields.next().unwrap_or_default();
                    corners.push(resolve_index(v, mesh.vertices.len()).map_err(fail)?);
                    match fields.next() {
                        Some(vt) if !vt.is_empty() => tex.push(resolve_index(vt, mesh.uv.len()).map_err(fail)?),
                        _ => all_faces_have_uv = false,
                    }
                }
                if corners.len() < 3 {
                    return Err(fail(format!("face with {} corners", corners.len())));
                }
                for k in 1..corners.len() - 1 {
                    mesh.faces.push([corners[0], corners[k], corners[k + 1]]);
                    if tex.len() == corners.len() {
                        uv_faces.push([tex[0], tex[k], tex[k + 1]]);
                    }
                }
            }
            Some("l") => {
                let polyline = parts
                    .map(|token| resolve_index(token, mesh.vertices.len()))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(fail)?;
                mesh.edges.extend(polyline.windows(2).map(|w| VertexEdge::new(w[0], w[1])));
            }
            _ => {}
        }
    }

    if all_faces_have_uv {
        mesh.uv_faces = uv_faces;
    }
    Ok(mesh)
}

/// Load an OBJ file.
///
/// # Example
///
/// ```no_run
/// use penner::io::obj;
///
/// let mesh = obj::load("fandisk.obj").unwrap();
/// println!("{} vertices, {} faces", mesh.vertices.len(), mesh.faces.len());
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<ObjMesh> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mesh = read(BufReader::new(file)).map_err(|(line, message)| MeshError::LoadError {
        path: path.to_path_buf(),
        message: format!("line {}: {}", line, message),
    })?;
    if mesh.faces.is_empty() {
        return Err(MeshError::LoadError {
            path: path.to_path_buf(),
            message: "OBJ file contains no faces".to_string(),
        });
    }
    log::debug!(
        "loaded {}: {} vertices, {} faces, {} uv, {} edges",
        path.display(),
        mesh.vertices.len(),
        mesh.faces.len(),
        mesh.uv.len(),
        mesh.edges.len()
    );
    Ok(mesh)
}

/// Write OBJ text.
pub fn write<W: Write>(mesh: &ObjMesh, out: &mut W) -> std::io::Result<()> {
    for p in &mesh.vertices {
        writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for t in &mesh.uv {
        writeln!(out, "vt {} {}", t.x, t.y)?;
    }
    if mesh.has_uv() {
        for (f, t) in mesh.faces.iter().zip(&mesh.uv_faces) {
            writeln!(
                out,
                "f {}/{} {}/{} {}/{}",
                f[0] + 1,
                t[0] + 1,
                f[1] + 1,
                t[1] + 1,
                f[2] + 1,
                t[2] + 1
            )?;
        }
    } else {
        for f in &mesh.faces {
            writeln!(out, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
        }
    }
    for e in &mesh.edges {
        writeln!(out, "l {} {}", e.v0 + 1, e.v1 + 1)?;
    }
    Ok(())
}

/// Save an OBJ file.
pub fn save<P: AsRef<Path>>(mesh: &ObjMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    write(mesh, &mut out)
        .and_then(|_| out.flush())
        .map_err(|e| MeshError::SaveError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    log::info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ObjMesh {
        read(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_corner_forms() {
        let mesh = parse(
            "# square\n\
             v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
             vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
             vn 0 0 1\n\
             f 1/1/1 2/2/1 3/3/1\n\
             f 1/1 3/3 4/4\n",
        );
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(mesh.uv_faces, vec![[0, 1, 2], [0, 2, 3]]);
        assert!(mesh.has_uv());
    }

    #[test]
    fn test_quad_is_fanned_and_relative_indices() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf -4 -3 -2 -1\n");
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
        assert!(mesh.uv_faces.is_empty());
    }

    #[test]
    fn test_mixed_uv_is_dropped() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nf 1/1 2/1 3/1\nf 1//1 3//1 4//1\n");
        assert_eq!(mesh.faces.len(), 2);
        assert!(!mesh.has_uv());
    }

    #[test]
    fn test_edge_records() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 1 1 0\nf 1 2 3\nl 1 2 3\n");
        assert_eq!(mesh.edges, vec![VertexEdge::new(0, 1), VertexEdge::new(1, 2)]);
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = read("v 0 0 0\nv 1 0 0\nf 1 2 7\n".as_bytes()).unwrap_err();
        assert_eq!(err.0, 3);
        assert!(read("v 0 0\n".as_bytes()).is_err());
        assert!(read("v 0 0 0\nf 0 1 1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.obj");
        let mesh = ObjMesh {
            vertices: vec![
                Point3::new(0.1, -2.0 / 3.0, 1e-300),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, std::f64::consts::PI),
            ],
            faces: vec![[0, 1, 2]],
            uv: vec![Point2::new(0.0, 0.0), Point2::new(0.25, 0.0), Point2::new(0.0, 1.0 / 3.0)],
            uv_faces: vec![[0, 1, 2]],
            edges: vec![VertexEdge::new(0, 2)],
        };
        save(&mesh, &path).unwrap();
        assert_eq!(load(&path).unwrap(), mesh);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(load("/nonexistent/mesh.obj"), Err(MeshError::Io(_))));
    }
}
