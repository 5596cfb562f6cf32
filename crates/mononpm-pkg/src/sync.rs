//! Keeping `optionalDependencies` in step with the local dependency graph.
//!
//! A package that consumes local packages also needs their external
//! dependencies installed. They are flattened into the package's own
//! `optionalDependencies` so the package manager installs them alongside.

use crate::manifest::{DependencyMap, ManifestError};
use crate::resolve::{transitive_local_deps, ResolveError};
use crate::Registry;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while synchronizing a manifest.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
}

/// Outcome of [`synchronize`].
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// The rewritten manifest.
    pub manifest_path: PathBuf,
    /// The derived block now stored in the manifest.
    pub optional_dependencies: DependencyMap,
    /// Whether the block differs from what the manifest held before.
    pub changed: bool,
}

/// Merge the direct external dependencies of every transitive local
/// dependency of `name`, later packages overriding earlier ones.
///
/// # Errors
///
/// Returns an error if the local dependency graph cannot be walked.
pub fn derive_optional_dependencies(
    registry: &Registry,
    name: &str,
) -> Result<DependencyMap, ResolveError> {
    let mut derived = DependencyMap::new();

    for dep in transitive_local_deps(registry, name)? {
        if dep == name {
            continue;
        }
        let package = registry
            .get(&dep)
            .ok_or_else(|| ResolveError::UnknownPackage {
                name: dep.clone(),
                required_by: Some(name.to_string()),
            })?;
        for (external, version) in &package.manifest.dependencies {
            derived.insert(external.clone(), version.clone());
        }
    }

    Ok(derived)
}

/// Recompute the `optionalDependencies` of `name` and rewrite its manifest.
///
/// The whole document is written back, so running this twice without graph
/// changes leaves the file byte-for-byte identical.
///
/// # Errors
///
/// Returns an error if the graph cannot be walked or the manifest cannot be
/// written.
pub fn synchronize(registry: &mut Registry, name: &str) -> Result<SyncReport, SyncError> {
    let derived = derive_optional_dependencies(registry, name)?;

    let package = registry
        .get_mut(name)
        .ok_or_else(|| ResolveError::UnknownPackage {
            name: name.to_string(),
            required_by: None,
        })?;

    let changed = package.manifest.optional_dependencies != derived;
    package.manifest.optional_dependencies = derived.clone();

    let manifest_path = package.manifest_path();
    package
        .manifest
        .write(&manifest_path)
        .map_err(|source| SyncError::Write {
            path: manifest_path.clone(),
            source,
        })?;

    debug!(
        package = name,
        path = %manifest_path.display(),
        count = derived.len(),
        changed,
        "wrote optionalDependencies"
    );

    Ok(SyncReport {
        manifest_path,
        optional_dependencies: derived,
        changed,
    })
}
