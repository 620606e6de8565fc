//! Saving and restoring Newton iterates.
//!
//! Checkpoints are JSON with round-trip float formatting, so a resumed solve
//! sees bit-identical coordinates.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};
use crate::metric::{ConstraintMode, Fingerprint};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// A Newton iterate with enough context to continue the solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version.
    pub version: u32,
    /// Constraint set the iterate was solved against.
    pub mode: ConstraintMode,
    /// Iterations completed.
    pub iteration: usize,
    /// Last line search step.
    pub lambda: f64,
    /// Residual norm of the iterate.
    pub error: f64,
    /// Edge coordinates.
    pub coords: Vec<f64>,
    /// Compatibility fingerprint of the metric and constraints.
    pub fingerprint: Fingerprint,
    /// Whether the soft boundary was pinned when the iterate was saved.
    #[serde(default)]
    pub pinned: bool,
}

impl Checkpoint {
    /// File name used for checkpoints of `mode` inside an output directory.
    pub fn path_in(dir: &Path, mode: ConstraintMode) -> PathBuf {
        dir.join(format!("checkpoint_{}.json", mode.name()))
    }

    /// Write the checkpoint as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let wrap = |message: String| MeshError::Checkpoint {
            path: path.to_path_buf(),
            message,
        };
        let file = File::create(path).map_err(|e| wrap(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|e| wrap(e.to_string()))?;
        writer.flush().map_err(|e| wrap(e.to_string()))?;
        Ok(())
    }

    /// Read a checkpoint written by [`Checkpoint::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let wrap = |message: String| MeshError::Checkpoint {
            path: path.to_path_buf(),
            message,
        };
        let file = File::open(path).map_err(|e| wrap(e.to_string()))?;
        let checkpoint: Checkpoint =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| wrap(e.to_string()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(wrap(format!(
                "unsupported version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        Ok(checkpoint)
    }
}
