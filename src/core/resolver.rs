//! Dependency resolution
//!
//! Turns project metadata into a [`DeclarationSet`]. Version solving is not
//! done here: the lock file already holds the solved graph.

use crate::core::declaration::{DeclarationSet, Dependency};
use crate::core::lock::{LockFile, MAX_LOCK_VERSION};
use crate::core::manifest::ProjectMetadata;
use crate::error::ResolutionError;

/// Source of a project's resolved dependencies
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, metadata: &ProjectMetadata) -> Result<DeclarationSet, ResolutionError>;
}

/// Resolver reading a Cargo lock file
///
/// Packages without a `source` are workspace members or path crates, i.e.
/// project source, and are left out of the declaration set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockfileResolver;

impl LockfileResolver {
    pub fn new() -> Self {
        Self
    }
}

impl DependencyResolver for LockfileResolver {
    fn resolve(&self, metadata: &ProjectMetadata) -> Result<DeclarationSet, ResolutionError> {
        let path = &metadata.lock_path;
        if !path.is_file() {
            return Err(ResolutionError::LockfileNotFound { path: path.clone() });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ResolutionError::Io {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let lock = LockFile::from_toml(&content).map_err(|e| ResolutionError::Parse {
            path: path.clone(),
            error: e.to_string(),
        })?;

        if let Some(version) = lock.version.filter(|v| *v > MAX_LOCK_VERSION) {
            return Err(ResolutionError::UnsupportedLockVersion {
                path: path.clone(),
                version,
            });
        }

        let declarations: DeclarationSet = lock
            .external_packages()
            .map(|package| {
                let mut dependency = Dependency::new(&package.name, &package.version);
                if let Some(source) = &package.source {
                    dependency = dependency.with_source(source);
                }
                if let Some(checksum) = &package.checksum {
                    dependency = dependency.with_checksum(checksum);
                }
                dependency
            })
            .collect();

        tracing::debug!(
            "Resolved {} external dependencies from {}",
            declarations.len(),
            path.display()
        );
        Ok(declarations)
    }
}
