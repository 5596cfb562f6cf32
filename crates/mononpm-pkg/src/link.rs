//! Materializing local dependencies into `node_modules`.
//!
//! Each transitive local dependency's build output and manifest are copied
//! into `<package>/node_modules/<dependency>`, where tooling resolves them like
//! any installed package.

use crate::package::MANIFEST_FILE;
use crate::resolve::{transitive_local_deps, ResolveError};
use crate::Registry;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Errors that can occur while linking local dependencies.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("build output of '{package}' not found at {} (has it been built?)", .path.display())]
    MissingBuildOutput { package: String, path: PathBuf },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {}: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LinkError + '_ {
    move |source| LinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Copy every transitive local dependency of `name` into its `node_modules`.
///
/// Returns the populated directories in dependency order.
///
/// # Errors
///
/// Returns an error if the graph cannot be walked, a dependency has not been
/// built yet, or any copy fails. Copies already made are left in place.
pub fn materialize(registry: &Registry, name: &str) -> Result<Vec<PathBuf>, LinkError> {
    let package = registry
        .get(name)
        .ok_or_else(|| ResolveError::UnknownPackage {
            name: name.to_string(),
            required_by: None,
        })?;
    let out_dir = &registry.settings().out_dir;

    let mut linked = Vec::new();
    for dep_name in transitive_local_deps(registry, name)? {
        let dep = registry
            .get(&dep_name)
            .ok_or_else(|| ResolveError::UnknownPackage {
                name: dep_name.clone(),
                required_by: Some(name.to_string()),
            })?;

        let from = dep.out_dir(out_dir);
        if !from.is_dir() {
            return Err(LinkError::MissingBuildOutput {
                package: dep_name,
                path: from,
            });
        }

        let to = package.dependency_dir(&dep_name);
        fs::create_dir_all(&to).map_err(io_err(&to))?;

        let files = copy_dir(&from, &to)?;

        let manifest_from = dep.manifest_path();
        let manifest_to = to.join(MANIFEST_FILE);
        copy_file(&manifest_from, &manifest_to)?;

        debug!(
            package = name,
            dependency = %dep_name,
            files,
            to = %to.display(),
            "linked local dependency"
        );
        linked.push(to);
    }

    Ok(linked)
}

/// Recursively copy the contents of `from` into `to`, overwriting existing
/// entries and carrying over timestamps and permission bits.
///
/// Symbolic links are recreated as links, not followed. Directory times and
/// modes are applied once all of their contents are in place, so read-only
/// source directories can be copied again over an earlier copy.
///
/// Returns the number of files and links copied.
///
/// # Errors
///
/// Returns an error if walking the source or writing the destination fails.
pub fn copy_dir(from: &Path, to: &Path) -> Result<u64, LinkError> {
    let mut files = 0;
    let mut dirs = Vec::new();

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|source| LinkError::Walk {
            root: from.to_path_buf(),
            source,
        })?;

        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if fs::symlink_metadata(&target).is_ok_and(|m| !m.is_dir()) {
                remove_entry(&target)?;
            }
            fs::create_dir_all(&target).map_err(io_err(&target))?;
            make_writable(&target)?;
            dirs.push((entry.into_path(), target));
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
        files += 1;
        trace!(path = %target.display(), "copied");
    }

    // Children before their parents.
    for (source, target) in dirs.iter().rev() {
        copy_metadata(source, target)?;
    }

    Ok(files)
}

/// Copy a single file, replacing the destination and keeping its metadata.
fn copy_file(from: &Path, to: &Path) -> Result<(), LinkError> {
    // A read-only destination would make `fs::copy` fail, and a link would be
    // written through.
    if fs::symlink_metadata(to).is_ok() {
        remove_entry(to)?;
    }
    fs::copy(from, to).map_err(io_err(from))?;
    copy_metadata(from, to)
}

/// Recreate the link at `from` as `to`, pointing at the same target.
fn copy_symlink(from: &Path, to: &Path) -> Result<(), LinkError> {
    let link_target = fs::read_link(from).map_err(io_err(from))?;
    if fs::symlink_metadata(to).is_ok() {
        remove_entry(to)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(&link_target, to).map_err(io_err(to))?;

    #[cfg(windows)]
    {
        if from.is_dir() {
            std::os::windows::fs::symlink_dir(&link_target, to).map_err(io_err(to))?;
        } else {
            std::os::windows::fs::symlink_file(&link_target, to).map_err(io_err(to))?;
        }
    }

    let metadata = fs::symlink_metadata(from).map_err(io_err(from))?;
    filetime::set_symlink_file_times(
        to,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )
    .map_err(io_err(to))
}

/// Remove whatever is at `path` without following links.
fn remove_entry(path: &Path) -> Result<(), LinkError> {
    let metadata = fs::symlink_metadata(path).map_err(io_err(path))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(io_err(path))
    } else {
        fs::remove_file(path).map_err(io_err(path))
    }
}

/// Give the owner write access to a directory left read-only by an earlier
/// copy; its mode is restored by [`copy_metadata`].
#[cfg(unix)]
fn make_writable(dir: &Path) -> Result<(), LinkError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(dir).map_err(io_err(dir))?.permissions();
    let mode = permissions.mode();
    if mode & 0o200 == 0 {
        permissions.set_mode(mode | 0o200);
        fs::set_permissions(dir, permissions).map_err(io_err(dir))?;
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn make_writable(_dir: &Path) -> Result<(), LinkError> {
    Ok(())
}

fn copy_metadata(from: &Path, to: &Path) -> Result<(), LinkError> {
    let metadata = fs::metadata(from).map_err(io_err(from))?;

    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(to, atime, mtime).map_err(io_err(to))?;

    fs::set_permissions(to, metadata.permissions()).map_err(io_err(to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_package(root: &Path, name: &str, json: &str) -> PathBuf {
        let dir = root.join("packages").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), json).unwrap();
        dir
    }

    fn write_dist(dir: &Path, files: &[(&str, &str)]) {
        for (path, content) in files {
            let path = dir.join("dist").join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    /// a <- b <- c, with `a` and `b` already built.
    fn chain_workspace() -> (TempDir, Registry) {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE),
            r#"{ "packages": ["packages/*"] }"#,
        )
        .unwrap();

        let a = write_package(tmp.path(), "a", r#"{ "name": "a", "main": "index.js" }"#);
        write_dist(&a, &[("index.js", "exports.a = 1;"), ("lib/util.js", "// util")]);

        let b = write_package(
            tmp.path(),
            "b",
            r#"{ "name": "b", "monoDependencies": { "a": "*" } }"#,
        );
        write_dist(&b, &[("index.js", "exports.b = 2;")]);

        write_package(
            tmp.path(),
            "c",
            r#"{ "name": "c", "monoDependencies": { "b": "*" } }"#,
        );

        let registry = Registry::load(tmp.path()).unwrap();
        (tmp, registry)
    }

    #[test]
    fn materialize_copies_full_transitive_set() {
        let (tmp, registry) = chain_workspace();
        let c = tmp.path().join("packages/c");

        let linked = materialize(&registry, "c").unwrap();
        assert_eq!(
            linked,
            vec![c.join("node_modules/a"), c.join("node_modules/b")]
        );

        assert_eq!(
            fs::read_to_string(c.join("node_modules/a/index.js")).unwrap(),
            "exports.a = 1;"
        );
        assert_eq!(
            fs::read_to_string(c.join("node_modules/a/lib/util.js")).unwrap(),
            "// util"
        );
        assert_eq!(
            fs::read_to_string(c.join("node_modules/b/index.js")).unwrap(),
            "exports.b = 2;"
        );
        assert_eq!(
            fs::read_to_string(c.join("node_modules/a/package.json")).unwrap(),
            fs::read_to_string(tmp.path().join("packages/a/package.json")).unwrap()
        );
    }

    #[test]
    fn materialize_leaf_does_nothing() {
        let (tmp, registry) = chain_workspace();
        assert!(materialize(&registry, "a").unwrap().is_empty());
        assert!(!tmp.path().join("packages/a/node_modules").exists());
    }

    #[test]
    fn missing_build_output_is_fatal() {
        let (tmp, registry) = chain_workspace();
        fs::remove_dir_all(tmp.path().join("packages/a/dist")).unwrap();

        let err = materialize(&registry, "b").unwrap_err();
        match err {
            LinkError::MissingBuildOutput { package, path } => {
                assert_eq!(package, "a");
                assert_eq!(path, tmp.path().join("packages/a/dist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn materialize_twice_yields_same_tree() {
        let (tmp, registry) = chain_workspace();
        let dest = tmp.path().join("packages/c/node_modules/a");

        materialize(&registry, "c").unwrap();
        let snapshot = |root: &Path| {
            let mut entries: Vec<(PathBuf, Vec<u8>)> = WalkDir::new(root)
                .into_iter()
                .map(Result::unwrap)
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    (
                        e.path().strip_prefix(root).unwrap().to_path_buf(),
                        fs::read(e.path()).unwrap(),
                    )
                })
                .collect();
            entries.sort();
            entries
        };
        let first = snapshot(&dest);

        materialize(&registry, "c").unwrap();
        assert_eq!(snapshot(&dest), first);
    }

    #[test]
    fn copy_preserves_modification_time() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::create_dir_all(from.join("nested")).unwrap();
        fs::write(from.join("nested/file.txt"), "hello").unwrap();

        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(from.join("nested/file.txt"), mtime).unwrap();

        fs::create_dir_all(&to).unwrap();
        assert_eq!(copy_dir(&from, &to).unwrap(), 1);

        let copied = fs::metadata(to.join("nested/file.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), mtime);
    }

    #[cfg(unix)]
    #[test]
    fn copy_preserves_permissions_and_overwrites_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::create_dir_all(&from).unwrap();
        fs::create_dir_all(&to).unwrap();

        let script = from.join("cli.js");
        fs::write(&script, "#!/usr/bin/env node").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o555)).unwrap();

        copy_dir(&from, &to).unwrap();
        let mode = fs::metadata(to.join("cli.js")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o555);

        // Second copy over the read-only file succeeds.
        copy_dir(&from, &to).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn copy_recreates_symlinks() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::create_dir_all(from.join("real")).unwrap();
        fs::write(from.join("real/index.js"), "// real").unwrap();
        symlink("real", from.join("alias")).unwrap();
        symlink("real/index.js", from.join("main.js")).unwrap();
        fs::create_dir_all(&to).unwrap();

        assert_eq!(copy_dir(&from, &to).unwrap(), 3);
        // Again over the existing links.
        assert_eq!(copy_dir(&from, &to).unwrap(), 3);

        for link in ["alias", "main.js"] {
            let metadata = fs::symlink_metadata(to.join(link)).unwrap();
            assert!(metadata.file_type().is_symlink(), "{link} is not a link");
        }
        assert_eq!(fs::read_link(to.join("alias")).unwrap(), PathBuf::from("real"));
        assert_eq!(
            fs::read_to_string(to.join("alias/index.js")).unwrap(),
            "// real"
        );
        assert_eq!(fs::read_to_string(to.join("main.js")).unwrap(), "// real");
    }

    #[cfg(unix)]
    #[test]
    fn copy_twice_into_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::create_dir_all(from.join("lib")).unwrap();
        fs::write(from.join("lib/util.js"), "// util").unwrap();
        fs::set_permissions(from.join("lib"), fs::Permissions::from_mode(0o555)).unwrap();
        fs::create_dir_all(&to).unwrap();

        copy_dir(&from, &to).unwrap();
        copy_dir(&from, &to).unwrap();

        let mode = fs::metadata(to.join("lib")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o555);
        assert_eq!(
            fs::read_to_string(to.join("lib/util.js")).unwrap(),
            "// util"
        );

        for dir in [from.join("lib"), to.join("lib")] {
            fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn scoped_dependency_lands_in_scope_dir() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE),
            r#"{ "packages": ["packages/*"] }"#,
        )
        .unwrap();
        let ui = write_package(tmp.path(), "ui", r#"{ "name": "@acme/ui" }"#);
        write_dist(&ui, &[("index.js", "// ui")]);
        write_package(
            tmp.path(),
            "web",
            r#"{ "name": "web", "monoDependencies": { "@acme/ui": "*" } }"#,
        );

        let registry = Registry::load(tmp.path()).unwrap();
        materialize(&registry, "web").unwrap();

        assert!(tmp
            .path()
            .join("packages/web/node_modules/@acme/ui/index.js")
            .is_file());
    }
}
