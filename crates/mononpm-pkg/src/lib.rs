//! Dependency-ordered builds for npm monorepos.
//!
//! This crate provides:
//! - Parsing and rewriting of `package.json` manifests
//! - Workspace discovery from the root manifest's `packages` globs
//! - The build queue and transitive local dependencies of each package
//! - Derivation of `optionalDependencies` from local dependencies
//! - Linking of local build output into `node_modules`
//! - The command runner seam used to invoke the package manager

mod link;
mod manifest;
mod package;
mod resolve;
mod runner;
mod sync;
mod workspace;

pub use link::{copy_dir, materialize, LinkError};
pub use manifest::{
    DependencyMap, LocalDependencyMap, Manifest, ManifestError, DEPENDENCIES_FIELD,
    MONO_DEPENDENCIES_FIELD, NAME_FIELD, OPTIONAL_DEPENDENCIES_FIELD,
};
pub use package::{
    LocalPackage, PackageError, DEFAULT_CLIENT, DEFAULT_OUT_DIR, DEPENDENCY_DIR, MANIFEST_FILE,
};
pub use resolve::{build_queue, transitive_local_deps, ResolveError};
pub use runner::{CommandOutput, CommandRunner, LifecycleCommand, NpmRunner, RunError};
pub use sync::{derive_optional_dependencies, synchronize, SyncError, SyncReport};
pub use workspace::{Registry, RootManifest, Settings, WorkspaceError};
