//! Frame field files.
//!
//! ```text
//! ffield <num_faces>
//! rx ry rz theta k0 k1 k2 p0 p1 p2
//! ...
//! ```
//!
//! One line per face: the reference direction, the field angle, the three
//! transport angles and the three period jumps. Floats are written in their
//! shortest exact decimal form, so a save/load round trip is lossless.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;

use crate::error::{MeshError, Result};
use crate::field::FrameField;

const HEADER: &str = "ffield";

/// Load a frame field.
pub fn load_frame_field<P: AsRef<Path>>(path: P) -> Result<FrameField> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let malformed = |line: usize, message: String| MeshError::FieldFormat {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut lines = reader.lines().enumerate();
    let num_faces = match lines.next() {
        Some((_, header)) => {
            let header = header?;
            let mut parts = header.split_whitespace();
            if parts.next() != Some(HEADER) {
                return Err(malformed(1, format!("expected '{} <num_faces>' header", HEADER)));
            }
            parts
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| malformed(1, "missing face count".to_string()))?
        }
        None => return Err(malformed(1, "empty file".to_string())),
    };

    let mut field = FrameField {
        reference_field: Vec::with_capacity(num_faces),
        theta: Vec::with_capacity(num_faces),
        kappa: Vec::with_capacity(num_faces),
        period_jump: Vec::with_capacity(num_faces),
    };
    for (index, line) in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 10 {
            return Err(malformed(line_number, format!("expected 10 values, found {}", tokens.len())));
        }
        let float = |i: usize| {
            tokens[i]
                .parse::<f64>()
                .map_err(|_| malformed(line_number, format!("invalid number '{}'", tokens[i])))
        };
        let int = |i: usize| {
            tokens[i]
                .parse::<i32>()
                .map_err(|_| malformed(line_number, format!("invalid period jump '{}'", tokens[i])))
        };
        field.reference_field.push(Vector3::new(float(0)?, float(1)?, float(2)?));
        field.theta.push(float(3)?);
        field.kappa.push([float(4)?, float(5)?, float(6)?]);
        field.period_jump.push([int(7)?, int(8)?, int(9)?]);
    }

    if field.num_faces() != num_faces {
        return Err(malformed(
            num_faces + 1,
            format!("header declares {} faces, found {}", num_faces, field.num_faces()),
        ));
    }
    log::debug!("loaded a frame field on {} faces from {}", num_faces, path.display());
    Ok(field)
}

/// Save a frame field.
pub fn save_frame_field<P: AsRef<Path>>(path: P, field: &FrameField) -> Result<()> {
    let path = path.as_ref();
    field.validate(field.num_faces())?;
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{} {}", HEADER, field.num_faces())?;
    for f in 0..field.num_faces() {
        let r = field.reference_field[f];
        let k = field.kappa[f];
        let p = field.period_jump[f];
        writeln!(
            out,
            "{} {} {} {} {} {} {} {} {} {}",
            r.x, r.y, r.z, field.theta[f], k[0], k[1], k[2], p[0], p[1], p[2]
        )?;
    }
    out.flush()?;
    log::info!("wrote frame field {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.ffield");
        let field = FrameField {
            reference_field: vec![Vector3::new(0.6, 0.8, 0.0), Vector3::new(-1.0 / 3.0, 0.0, 2f64.sqrt())],
            theta: vec![0.1 + 0.2, -std::f64::consts::FRAC_PI_3],
            kappa: vec![[1e-17, -0.5, 3.0], [0.0, -0.0, 1.2345678901234567]],
            period_jump: vec![[0, -1, 2], [3, 0, -4]],
        };
        save_frame_field(&path, &field).unwrap();
        let loaded = load_frame_field(&path).unwrap();
        assert_eq!(loaded, field);
        for (a, b) in loaded.theta.iter().zip(&field.theta) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ffield");
        std::fs::write(&path, "field 1\n1 0 0 0 0 0 0 0 0 0\n").unwrap();
        assert!(matches!(load_frame_field(&path), Err(MeshError::FieldFormat { line: 1, .. })));
    }

    #[test]
    fn test_count_mismatch_and_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.ffield");
        std::fs::write(&path, "ffield 2\n1 0 0 0 0 0 0 0 0 0\n").unwrap();
        assert!(matches!(load_frame_field(&path), Err(MeshError::FieldFormat { .. })));

        std::fs::write(&path, "ffield 1\n1 0 0 0 0 0 0 0.5 0 0\n").unwrap();
        assert!(matches!(load_frame_field(&path), Err(MeshError::FieldFormat { line: 2, .. })));
    }
}
