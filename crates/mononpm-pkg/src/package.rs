//! Local packages and their on-disk layout.
//!
//! ```text
//! packages/app/
//! ├── package.json          # Package manifest
//! ├── dist/                 # Build output, copied into dependents
//! └── node_modules/
//!     └── core/             # Materialized local dependency
//!         ├── index.js
//!         └── package.json
//! ```

use crate::{Manifest, ManifestError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The manifest filename.
pub const MANIFEST_FILE: &str = "package.json";

/// The dependency-resolution directory of a package.
pub const DEPENDENCY_DIR: &str = "node_modules";

/// Default build output directory.
pub const DEFAULT_OUT_DIR: &str = "dist";

/// Default package manager executable.
pub const DEFAULT_CLIENT: &str = "npm";

/// Errors that can occur when loading a package.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("package directory not found: {0}")]
    NotFound(PathBuf),

    #[error("manifest not found at: {0}")]
    ManifestNotFound(PathBuf),

    #[error("invalid manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
}

/// A package of the workspace.
#[derive(Debug, Clone)]
pub struct LocalPackage {
    /// Directory relative to the workspace root.
    pub dir: PathBuf,

    /// Absolute (root-joined) directory.
    pub path: PathBuf,

    /// The parsed manifest.
    pub manifest: Manifest,
}

impl LocalPackage {
    /// Load the package in `dir`, relative to the workspace `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or its manifest is missing or invalid.
    pub fn load(root: &Path, dir: impl Into<PathBuf>) -> Result<Self, PackageError> {
        let dir = dir.into();
        let path = root.join(&dir);

        if !path.is_dir() {
            return Err(PackageError::NotFound(path));
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(PackageError::ManifestNotFound(manifest_path));
        }

        let manifest =
            Manifest::from_path(&manifest_path).map_err(|source| PackageError::Manifest {
                path: manifest_path,
                source,
            })?;

        Ok(Self {
            dir,
            path,
            manifest,
        })
    }

    /// Package name as declared in the manifest.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Path of the on-disk manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Directory holding this package's build output.
    #[must_use]
    pub fn out_dir(&self, out_dir: &str) -> PathBuf {
        self.path.join(out_dir)
    }

    /// Where a dependency named `dep` is materialized inside this package.
    ///
    /// Scoped names map to nested directories (`@scope/name`).
    #[must_use]
    pub fn dependency_dir(&self, dep: &str) -> PathBuf {
        dep.split('/')
            .fold(self.path.join(DEPENDENCY_DIR), |path, part| path.join(part))
    }
}
