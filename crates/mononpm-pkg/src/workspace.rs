//! Workspace discovery and the package registry.
//!
//! The workspace root carries a `package.json` listing its member packages as
//! glob patterns, plus optional tool settings:
//!
//! ```json
//! {
//!   "name": "my-monorepo",
//!   "private": true,
//!   "packages": ["packages/*", "apps/web"],
//!   "mononpm": { "client": "npm", "outDir": "dist" }
//! }
//! ```

use crate::manifest::ManifestError;
use crate::package::{LocalPackage, PackageError, DEFAULT_CLIENT, DEFAULT_OUT_DIR, MANIFEST_FILE};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur when working with workspaces.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("invalid workspace manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("package error: {0}")]
    Package(#[from] PackageError),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("IO error while expanding globs: {0}")]
    GlobIo(#[from] glob::GlobError),

    #[error("no workspace manifest found above {0}")]
    NotFound(PathBuf),
}

/// The root `package.json` of a workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct RootManifest {
    /// Name of the root package, if any.
    #[serde(default)]
    pub name: Option<String>,

    /// Member packages specified as glob patterns, in declaration order.
    #[serde(default)]
    pub packages: Option<Vec<String>>,

    /// Tool settings.
    #[serde(default)]
    pub mononpm: Settings,
}

/// Tool settings read from the root manifest's `mononpm` block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// Package manager executable used for install, build and scripts.
    pub client: String,

    /// Build output directory of every package, relative to the package.
    pub out_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client: DEFAULT_CLIENT.to_string(),
            out_dir: DEFAULT_OUT_DIR.to_string(),
        }
    }
}

impl RootManifest {
    /// Load a root manifest from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a root manifest from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Check if this manifest declares workspace members.
    #[must_use]
    pub fn is_workspace(&self) -> bool {
        self.packages.is_some()
    }
}

/// Name-to-package map of every package in the workspace.
///
/// Iteration follows discovery order, which is what makes the build queue
/// deterministic.
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    settings: Settings,
    packages: IndexMap<String, LocalPackage>,
}

impl Registry {
    /// Load the workspace rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root manifest is missing, malformed or has no
    /// `packages` field, or if any matched package has no valid manifest.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);

        let manifest =
            RootManifest::from_path(&manifest_path).map_err(|source| WorkspaceError::Manifest {
                path: manifest_path.clone(),
                source,
            })?;

        let patterns = manifest
            .packages
            .ok_or_else(|| WorkspaceError::Manifest {
                path: manifest_path,
                source: ManifestError::NotAWorkspace,
            })?;

        let packages = Self::discover_packages(&root, &patterns)?;
        Ok(Self::from_packages(root, manifest.mononpm, packages))
    }

    /// Find a workspace by searching upward from a directory.
    ///
    /// Manifests without a `packages` list are passed over. A manifest that
    /// cannot be parsed stops the search.
    ///
    /// # Errors
    ///
    /// Returns an error if no workspace is found, a manifest on the way up is
    /// malformed, or the workspace fails to load.
    pub fn find(start: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let start = start.as_ref();
        let mut current = Some(start);

        while let Some(dir) = current {
            let manifest = dir.join(MANIFEST_FILE);
            if manifest.is_file() {
                let root = RootManifest::from_path(&manifest).map_err(|source| {
                    WorkspaceError::Manifest {
                        path: manifest.clone(),
                        source,
                    }
                })?;
                if root.is_workspace() {
                    return Self::load(dir);
                }
                trace!(path = %manifest.display(), "not a workspace root");
            }
            current = dir.parent();
        }

        Err(WorkspaceError::NotFound(start.to_path_buf()))
    }

    /// Build a registry from already loaded packages.
    ///
    /// A later package with the same name replaces the earlier one but keeps
    /// its position.
    pub fn from_packages(
        root: impl Into<PathBuf>,
        settings: Settings,
        packages: impl IntoIterator<Item = LocalPackage>,
    ) -> Self {
        let mut map = IndexMap::new();
        for package in packages {
            if let Some(previous) = map.insert(package.name().to_string(), package) {
                debug!(
                    name = %previous.name(),
                    dir = %previous.dir.display(),
                    "package replaced by a later match"
                );
            }
        }

        Self {
            root: root.into(),
            settings,
            packages: map,
        }
    }

    /// Expand every pattern and load each matched package, in order.
    ///
    /// Matches are not deduplicated; a directory matched by two patterns is
    /// loaded twice.
    fn discover_packages(
        root: &Path,
        patterns: &[String],
    ) -> Result<Vec<LocalPackage>, WorkspaceError> {
        let mut packages = Vec::new();

        for pattern in patterns {
            let full_pattern = root.join(pattern);
            let pattern_str = full_pattern.to_string_lossy();

            for entry in glob::glob(&pattern_str)? {
                let path = entry?;

                if !path.is_dir() {
                    trace!(path = %path.display(), "skipping non-directory match");
                    continue;
                }

                let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                packages.push(LocalPackage::load(root, relative)?);
            }
        }

        Ok(packages)
    }

    /// Root directory of the workspace.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tool settings of the workspace.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable access to the settings, for command-line overrides.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Get a package by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&LocalPackage> {
        self.packages.get(name)
    }

    /// Get a package by name for modification.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut LocalPackage> {
        self.packages.get_mut(name)
    }

    /// Names of all packages in discovery order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Number of packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns true if the workspace has no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
