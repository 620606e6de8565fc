//! Feature edge files: one `v0 v1` pair of zero-based vertex indices per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{MeshError, Result};
use crate::feature::VertexEdge;

/// Load feature edges. Blank lines are skipped.
pub fn load_feature_edges<P: AsRef<Path>>(path: P) -> Result<Vec<VertexEdge>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut edges = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let indices: Vec<usize> = line
            .split_whitespace()
            .map(|token| token.parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| MeshError::LoadError {
                path: path.to_path_buf(),
                message: format!("line {}: {}", index + 1, e),
            })?;
        match indices.as_slice() {
            &[v0, v1] => edges.push(VertexEdge::new(v0, v1)),
            _ => {
                return Err(MeshError::LoadError {
                    path: path.to_path_buf(),
                    message: format!("line {}: expected two vertex indices", index + 1),
                })
            }
        }
    }
    Ok(edges)
}

/// Save feature edges.
pub fn save_feature_edges<P: AsRef<Path>>(path: P, edges: &[VertexEdge]) -> Result<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    for edge in edges {
        writeln!(out, "{} {}", edge.v0, edge.v1)?;
    }
    out.flush()?;
    log::info!("wrote {} feature edges to {}", edges.len(), path.display());
    Ok(())
}
