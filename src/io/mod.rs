//! File I/O.
//!
//! | File | Module | Contents |
//! |------|--------|----------|
//! | `<name>.obj` | [`obj`] | mesh, optional UVs and `l` edge records |
//! | `<name>.ffield` | [`field`] | frame field per face |
//! | `<name>_features`, `<name>_hard_features` | [`features`] | feature edges |
//!
//! [`OutputFiles`] builds the conventional file names for a mesh.
//!
//! ```no_run
//! use penner::io::{self, OutputFiles};
//!
//! let files = OutputFiles::new("out", "fandisk");
//! let mesh = io::obj::load(files.mesh()).unwrap();
//! let features = io::load_feature_edges(files.features()).unwrap();
//! let field = io::load_frame_field(files.field()).unwrap();
//! ```

pub mod features;
pub mod field;
pub mod obj;

pub use features::{load_feature_edges, save_feature_edges};
pub use field::{load_frame_field, save_frame_field};
pub use obj::ObjMesh;

use std::path::{Path, PathBuf};

/// Conventional file names for one mesh in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    dir: PathBuf,
    name: String,
}

impl OutputFiles {
    /// Files for mesh `name` in `dir`.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// Files in `dir` named after the stem of `mesh_path`.
    pub fn for_mesh(dir: impl Into<PathBuf>, mesh_path: &Path) -> Self {
        let name = mesh_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mesh".to_string());
        Self::new(dir, name)
    }

    /// The mesh name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.name, suffix))
    }

    /// `<name>.obj`
    pub fn mesh(&self) -> PathBuf {
        self.file(".obj")
    }

    /// `<name>_features`
    pub fn features(&self) -> PathBuf {
        self.file("_features")
    }

    /// `<name>_hard_features`
    pub fn hard_features(&self) -> PathBuf {
        self.file("_hard_features")
    }

    /// `<name>.ffield`
    pub fn field(&self) -> PathBuf {
        self.file(".ffield")
    }

    /// `<name>_opt.obj`, the parameterization written by the optimizer.
    pub fn optimized(&self) -> PathBuf {
        self.file("_opt.obj")
    }

    /// `<name>_param.obj`, the parameterization written by a session.
    pub fn parameterized(&self) -> PathBuf {
        self.file("_param.obj")
    }
}
