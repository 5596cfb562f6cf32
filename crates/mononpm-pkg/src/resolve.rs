//! Build ordering for workspace packages.
//!
//! This module provides:
//! - The global build queue (every package after its local dependencies)
//! - The transitive local dependencies of a single package
//! - Detection of unknown and circular local dependencies

use crate::Registry;
use std::collections::HashSet;
use thiserror::Error;
use tracing::trace;

/// Errors that can occur while ordering packages.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// A local dependency that is not part of the workspace.
    #[error("{}", describe_unknown(.name, .required_by.as_deref()))]
    UnknownPackage {
        name: String,
        required_by: Option<String>,
    },

    /// Circular dependency detected.
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
}

fn describe_unknown(name: &str, required_by: Option<&str>) -> String {
    match required_by {
        Some(parent) => {
            format!("package '{name}' (required by '{parent}') is not part of the workspace")
        }
        None => format!("package '{name}' is not part of the workspace"),
    }
}

/// Depth-first walk that appends a package after all of its local
/// dependencies.
///
/// `emitted` only prunes subtrees that are already fully in `order`, so the
/// result equals a plain recursive walk with duplicates dropped.
struct Walk<'a> {
    registry: &'a Registry,
    path: Vec<String>,
    emitted: HashSet<String>,
    order: Vec<String>,
}

impl<'a> Walk<'a> {
    fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            path: Vec::new(),
            emitted: HashSet::new(),
            order: Vec::new(),
        }
    }

    fn visit(&mut self, name: &str, required_by: Option<&str>) -> Result<(), ResolveError> {
        if self.emitted.contains(name) {
            return Ok(());
        }

        if let Some(start) = self.path.iter().position(|n| n == name) {
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ResolveError::CircularDependency { cycle });
        }

        self.path.push(name.to_string());
        self.visit_dependencies(name, required_by)?;
        self.path.pop();

        trace!(package = name, position = self.order.len(), "ordered");
        self.emitted.insert(name.to_string());
        self.order.push(name.to_string());
        Ok(())
    }

    fn visit_dependencies(
        &mut self,
        name: &str,
        required_by: Option<&str>,
    ) -> Result<(), ResolveError> {
        let package = self
            .registry
            .get(name)
            .ok_or_else(|| ResolveError::UnknownPackage {
                name: name.to_string(),
                required_by: required_by.map(str::to_string),
            })?;

        for dep in package.manifest.mono_dependencies.keys() {
            self.visit(dep, Some(name))?;
        }
        Ok(())
    }
}

/// Compute the order in which every package of the workspace is processed.
///
/// Roots are visited in registry order and each package's local
/// dependencies in declaration order, so the queue is stable for a given set
/// of manifests.
///
/// # Errors
///
/// Returns an error if a local dependency is unknown or the graph has a cycle.
pub fn build_queue(registry: &Registry) -> Result<Vec<String>, ResolveError> {
    let mut walk = Walk::new(registry);
    for name in registry.names() {
        walk.visit(name, None)?;
    }
    Ok(walk.order)
}

/// All local packages `name` depends on, directly or not, dependencies first.
///
/// The package itself is never part of the result.
///
/// # Errors
///
/// Returns an error if `name` or one of its local dependencies is unknown, or
/// if the subgraph has a cycle.
pub fn transitive_local_deps(registry: &Registry, name: &str) -> Result<Vec<String>, ResolveError> {
    let mut walk = Walk::new(registry);
    walk.path.push(name.to_string());
    walk.visit_dependencies(name, None)?;
    Ok(walk.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalPackage, Manifest, Settings};
    use std::path::PathBuf;

    fn package(name: &str, deps: &[&str]) -> LocalPackage {
        let mut manifest = Manifest::new(name);
        for dep in deps {
            manifest
                .mono_dependencies
                .insert((*dep).to_string(), serde_json::Value::from("*"));
        }
        LocalPackage {
            dir: PathBuf::from(name),
            path: PathBuf::from("/repo").join(name),
            manifest,
        }
    }

    fn registry(packages: Vec<LocalPackage>) -> Registry {
        Registry::from_packages("/repo", Settings::default(), packages)
    }

    fn position(queue: &[String], name: &str) -> usize {
        queue.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_chain_queue() {
        let reg = registry(vec![
            package("c", &["b"]),
            package("b", &["a"]),
            package("a", &[]),
        ]);
        assert_eq!(build_queue(&reg).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(transitive_local_deps(&reg, "c").unwrap(), vec!["a", "b"]);
        assert!(transitive_local_deps(&reg, "a").unwrap().is_empty());
    }

    #[test]
    fn test_queue_follows_registry_then_declaration_order() {
        let reg = registry(vec![
            package("app", &["ui", "api"]),
            package("api", &["core"]),
            package("ui", &["core"]),
            package("core", &[]),
            package("docs", &[]),
        ]);
        assert_eq!(
            build_queue(&reg).unwrap(),
            vec!["core", "ui", "api", "app", "docs"]
        );
    }

    #[test]
    fn test_diamond_has_no_duplicates() {
        let reg = registry(vec![
            package("top", &["left", "right"]),
            package("left", &["base"]),
            package("right", &["base"]),
            package("base", &[]),
        ]);
        let deps = transitive_local_deps(&reg, "top").unwrap();
        assert_eq!(deps, vec!["base", "left", "right"]);
    }

    #[test]
    fn test_queue_respects_every_edge() {
        let reg = registry(vec![
            package("e", &["d", "b"]),
            package("a", &[]),
            package("d", &["c", "a"]),
            package("c", &["b"]),
            package("b", &["a"]),
            package("f", &["e", "c"]),
        ]);
        let queue = build_queue(&reg).unwrap();

        assert_eq!(queue.len(), reg.len());
        let unique: HashSet<&String> = queue.iter().collect();
        assert_eq!(unique.len(), queue.len());

        for name in reg.names() {
            for dep in transitive_local_deps(&reg, name).unwrap() {
                assert!(
                    position(&queue, &dep) < position(&queue, name),
                    "{dep} must come before {name}"
                );
            }
        }
    }

    #[test]
    fn test_transitive_deps_match_plain_recursion() {
        // Unpruned recursion visits "a" twice: [a, b, c, a].
        let reg = registry(vec![
            package("d", &["c", "a"]),
            package("c", &["b"]),
            package("b", &["a"]),
            package("a", &[]),
        ]);
        assert_eq!(transitive_local_deps(&reg, "d").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let reg = registry(vec![package("app", &["missing"])]);

        let err = build_queue(&reg).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownPackage {
                name: "missing".to_string(),
                required_by: Some("app".to_string()),
            }
        );
        assert!(err.to_string().contains("required by 'app'"));

        let err = transitive_local_deps(&reg, "nope").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownPackage { required_by: None, .. }));
    }

    #[test]
    fn test_cycle_is_reported() {
        let reg = registry(vec![
            package("a", &["b"]),
            package("b", &["c"]),
            package("c", &["a"]),
        ]);

        let err = build_queue(&reg).unwrap_err();
        assert_eq!(
            err,
            ResolveError::CircularDependency {
                cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()],
            }
        );
        assert_eq!(
            err.to_string(),
            "circular dependency detected: a -> b -> c -> a"
        );

        let err = transitive_local_deps(&reg, "b").unwrap_err();
        assert!(matches!(err, ResolveError::CircularDependency { .. }));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let reg = registry(vec![package("solo", &["solo"])]);
        let err = transitive_local_deps(&reg, "solo").unwrap_err();
        assert_eq!(
            err,
            ResolveError::CircularDependency {
                cycle: vec!["solo".into(), "solo".into()],
            }
        );
    }

    #[test]
    fn test_empty_registry() {
        let reg = registry(Vec::new());
        assert!(build_queue(&reg).unwrap().is_empty());
    }
}
