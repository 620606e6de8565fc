//! Error types for penner.
//!
//! This module defines all error types used throughout the library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`MeshError`].
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur while cutting, optimizing, or parameterizing a mesh.
#[derive(Error, Debug)]
pub enum MeshError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// The mesh has non-manifold topology.
    #[error("mesh has non-manifold topology: {details}")]
    NonManifold {
        /// Description of the non-manifold condition.
        details: String,
    },

    /// An edge has more than two incident faces, or two faces with the same orientation.
    #[error("edge ({v0}, {v1}) has more than two incident faces or inconsistent orientation")]
    NonManifoldEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
    },

    /// A feature edge does not exist in the mesh.
    #[error("feature edge ({v0}, {v1}) is not an edge of the mesh")]
    InvalidFeatureEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
    },

    /// The feature configuration cannot be cut consistently.
    #[error("invalid feature configuration: {details}")]
    Feature {
        /// Description of the failure.
        details: String,
    },

    /// The feature or seam cut could not be made consistent.
    #[error("inconsistent cut: {details}")]
    InconsistentCut {
        /// Description of the failure.
        details: String,
    },

    /// A metric layout revisited a vertex at a different position.
    #[error("inconsistent layout: {details}")]
    Layout {
        /// Description of the inconsistency.
        details: String,
    },

    /// Two correlated inputs disagree in size.
    #[error("size mismatch for {what}: expected {expected}, found {found}")]
    SizeMismatch {
        /// What was being compared.
        what: &'static str,
        /// The expected size.
        expected: usize,
        /// The actual size.
        found: usize,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error loading data from a file.
    #[error("failed to load {path}: {message}")]
    LoadError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Error saving data to a file.
    #[error("failed to save {path}: {message}")]
    SaveError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A frame-field file is malformed.
    #[error("malformed frame field {path} (line {line}): {message}")]
    FieldFormat {
        /// The file path.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// A checkpoint could not be written or parsed.
    #[error("checkpoint {path}: {message}")]
    Checkpoint {
        /// The checkpoint path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A checkpoint does not belong to the current mesh or constraint system.
    #[error("checkpoint does not match the current metric: {reason}")]
    CheckpointMismatch {
        /// Which compatibility check failed.
        reason: String,
    },

    /// A linear system could not be factored or solved.
    #[error("{solver} linear solve failed: {reason}")]
    LinearSolve {
        /// Solver back end name.
        solver: &'static str,
        /// Reason for the failure.
        reason: String,
    },

    /// Invalid state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Iterative algorithm failed to converge.
    #[error("algorithm failed to converge after {iterations} iterations")]
    ConvergenceFailed {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl MeshError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        MeshError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(what: &'static str, expected: usize, found: usize) -> Self {
        MeshError::SizeMismatch {
            what,
            expected,
            found,
        }
    }

    /// Whether this error comes from the mesh or cut topology.
    pub fn is_topological(&self) -> bool {
        matches!(
            self,
            MeshError::NonManifold { .. }
                | MeshError::NonManifoldEdge { .. }
                | MeshError::InvalidFeatureEdge { .. }
                | MeshError::Feature { .. }
                | MeshError::InconsistentCut { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = MeshError::InvalidFeatureEdge { v0: 3, v1: 7 };
        assert_eq!(err.to_string(), "feature edge (3, 7) is not an edge of the mesh");
        assert!(err.is_topological());

        let err = MeshError::invalid_param("max_itr", -1, "must be non-negative");
        assert!(err.to_string().contains("max_itr = -1"));
        assert!(!err.is_topological());
    }
}
