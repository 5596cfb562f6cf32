//! npm package manifest (`package.json`) parsing and rewriting.
//!
//! Only a handful of fields are understood; everything else in the document is
//! kept untouched, in its original key order, so a rewrite never drops data:
//!
//! ```json
//! {
//!   "name": "app",
//!   "dependencies": { "react": "^18.2.0" },
//!   "monoDependencies": { "ui": "*" },
//!   "optionalDependencies": { "lodash": "^4.17.21" }
//! }
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Dependency name to version requirement, in declaration order.
pub type DependencyMap = IndexMap<String, String>;

/// Local dependency name to its declared value.
///
/// Only the keys are meaningful; values are kept as written (`"*"`, `true`,
/// ...) so a rewrite reproduces them.
pub type LocalDependencyMap = IndexMap<String, Value>;

/// Key of the package name.
pub const NAME_FIELD: &str = "name";

/// Key of the external dependency declarations.
pub const DEPENDENCIES_FIELD: &str = "dependencies";

/// Key of the local (in-repository) dependency declarations.
pub const MONO_DEPENDENCIES_FIELD: &str = "monoDependencies";

/// Key of the derived block owned by this tool.
pub const OPTIONAL_DEPENDENCIES_FIELD: &str = "optionalDependencies";

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid package name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("not a workspace: missing \"packages\" field")]
    NotAWorkspace,
}

/// The fields of `package.json` this crate reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnownFields {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    version: Option<String>,

    #[serde(default)]
    dependencies: Option<DependencyMap>,

    #[serde(default)]
    mono_dependencies: Option<LocalDependencyMap>,

    #[serde(default)]
    optional_dependencies: Option<DependencyMap>,
}

/// A parsed `package.json`.
///
/// The typed fields are the source of truth for serialization: writing the
/// manifest puts them back into the preserved document at their original
/// position.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Package name, used as the registry key.
    pub name: String,

    /// Package version, if declared.
    pub version: Option<String>,

    /// External dependencies installed by the package manager.
    pub dependencies: DependencyMap,

    /// Local dependencies on other packages of the workspace.
    pub mono_dependencies: LocalDependencyMap,

    /// External dependencies required transitively by local dependencies.
    pub optional_dependencies: DependencyMap,

    /// The full document as read from disk.
    document: Map<String, Value>,
}

impl Manifest {
    /// Create a manifest with only a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut document = Map::new();
        document.insert(NAME_FIELD.to_string(), Value::String(name.clone()));
        Self {
            name,
            version: None,
            dependencies: DependencyMap::new(),
            mono_dependencies: LocalDependencyMap::new(),
            optional_dependencies: DependencyMap::new(),
            document,
        }
    }

    /// Load a manifest from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid, is not an object, or lacks a
    /// usable `name`.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let Value::Object(document) = serde_json::from_str::<Value>(content)? else {
            return Err(ManifestError::NotAnObject);
        };

        let fields: KnownFields = serde_json::from_value(Value::Object(document.clone()))?;
        let name = fields.name.ok_or(ManifestError::MissingField(NAME_FIELD))?;
        validate_name(&name)?;

        Ok(Self {
            name,
            version: fields.version,
            dependencies: fields.dependencies.unwrap_or_default(),
            mono_dependencies: fields.mono_dependencies.unwrap_or_default(),
            optional_dependencies: fields.optional_dependencies.unwrap_or_default(),
            document,
        })
    }

    /// Look up any top-level field of the document, known or not.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    /// Iterate over the fields this crate does not interpret.
    pub fn extra_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.document.iter().filter(|(key, _)| !is_known_field(key))
    }

    /// Build the document that would be written to disk.
    #[must_use]
    pub fn to_document(&self) -> Map<String, Value> {
        let mut document = self.document.clone();

        document.insert(NAME_FIELD.to_string(), Value::String(self.name.clone()));
        if let Some(version) = &self.version {
            document.insert("version".to_string(), Value::String(version.clone()));
        }

        if !self.dependencies.is_empty() || document.contains_key(DEPENDENCIES_FIELD) {
            document.insert(
                DEPENDENCIES_FIELD.to_string(),
                dependency_object(&self.dependencies),
            );
        }
        if !self.mono_dependencies.is_empty() || document.contains_key(MONO_DEPENDENCIES_FIELD) {
            document.insert(
                MONO_DEPENDENCIES_FIELD.to_string(),
                Value::Object(
                    self.mono_dependencies
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                ),
            );
        }

        // Always present after a rewrite, even when empty.
        document.insert(
            OPTIONAL_DEPENDENCIES_FIELD.to_string(),
            dependency_object(&self.optional_dependencies),
        );

        document
    }

    /// Serialize the manifest as pretty-printed JSON (two-space indent).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(&Value::Object(
            self.to_document(),
        ))?)
    }

    /// Overwrite the file at `path` with this manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let content = self.to_json_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_known_field(key: &str) -> bool {
    matches!(
        key,
        NAME_FIELD
            | "version"
            | DEPENDENCIES_FIELD
            | MONO_DEPENDENCIES_FIELD
            | OPTIONAL_DEPENDENCIES_FIELD
    )
}

fn dependency_object(deps: &DependencyMap) -> Value {
    Value::Object(
        deps.iter()
            .map(|(name, version)| (name.clone(), Value::String(version.clone())))
            .collect(),
    )
}

/// Validate a package name.
///
/// npm names may carry a scope (`@scope/name`); anything that could escape the
/// `node_modules` directory is rejected.
fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot be empty",
        ));
    }

    if name.len() > 214 {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot exceed 214 characters",
        ));
    }

    let unscoped = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, rest)) if !scope.is_empty() && !rest.is_empty() => rest,
            _ => {
                return Err(ManifestError::InvalidName(
                    name.to_string(),
                    "scoped names must look like @scope/name",
                ))
            }
        },
        None => name,
    };

    if unscoped.contains('/') || unscoped.contains('\\') || unscoped.starts_with('.') {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot contain path separators or start with a dot",
        ));
    }

    Ok(())
}
