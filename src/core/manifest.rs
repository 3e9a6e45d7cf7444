//! Project metadata
//!
//! Locates a project's manifest (`Cargo.toml`) and lock file (`Cargo.lock`)
//! for dependency resolution, and its source tree for compilation.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ResolutionError;

pub const MANIFEST_FILE: &str = "Cargo.toml";
pub const LOCK_FILE: &str = "Cargo.lock";

/// The parts of a Cargo manifest we read
#[derive(Debug, Deserialize)]
struct CargoManifest {
    package: Option<PackageSection>,
}

#[derive(Debug, Deserialize)]
struct PackageSection {
    name: String,
}

/// Where a project's dependency metadata lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub root: PathBuf,
    pub manifest_path: PathBuf,
    pub lock_path: PathBuf,
    /// Package name; `None` for a virtual workspace
    pub name: Option<String>,
}

impl ProjectMetadata {
    /// Metadata with explicit paths, without touching the filesystem
    pub fn new(root: impl Into<PathBuf>, manifest_path: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            root: root.into(),
            manifest_path,
            lock_path,
            name: None,
        }
    }

    /// Find the manifest and lock file in `root`
    pub fn discover(root: &Path) -> Result<Self, ResolutionError> {
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(ResolutionError::ManifestNotFound {
                path: manifest_path,
            });
        }

        let content =
            std::fs::read_to_string(&manifest_path).map_err(|e| ResolutionError::Io {
                path: manifest_path.clone(),
                error: e.to_string(),
            })?;
        let manifest: CargoManifest =
            toml::from_str(&content).map_err(|e| ResolutionError::Parse {
                path: manifest_path.clone(),
                error: e.to_string(),
            })?;

        Ok(Self {
            root: root.to_path_buf(),
            lock_path: root.join(LOCK_FILE),
            manifest_path,
            name: manifest.package.map(|p| p.name),
        })
    }

    /// Source tree belonging to this project
    pub fn source(&self) -> ProjectSource {
        ProjectSource::new(&self.root)
    }
}

/// The project's own source tree
///
/// Only the project compile stage ever sees this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSource {
    root: PathBuf,
}

impl ProjectSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
