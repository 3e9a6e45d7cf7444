//! Build artifacts
//!
//! [`CompiledDependencyBundle`] holds the compiled dependencies for one
//! recipe; [`Binary`] is the final program. Both carry a build timestamp
//! that is excluded from their content digests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::error::BundleError;

/// Non-deterministic metadata attached to build products
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    /// When the artifact was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

impl BuildMetadata {
    /// Metadata stamped with the current time
    pub fn now() -> Self {
        Self {
            built_at: Some(Utc::now()),
        }
    }
}

/// Compiled dependencies: relative artifact path to file contents
///
/// Artifact paths are `/`-separated and always stay inside the directory
/// the bundle is written to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledDependencyBundle {
    #[serde(with = "hex_artifacts")]
    artifacts: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    metadata: BuildMetadata,
}

impl CompiledDependencyBundle {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact, replacing any previous one at the same path
    pub fn with_artifact(
        mut self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Result<Self, BundleError> {
        self.insert(path, contents)?;
        Ok(self)
    }

    /// Attach build metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: BuildMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add an artifact in place
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Result<(), BundleError> {
        let path = path.into();
        if !is_contained(&path) {
            return Err(BundleError::InvalidArtifactPath { path });
        }
        self.artifacts.insert(path, contents.into());
        Ok(())
    }

    /// Artifacts in path order
    pub fn artifacts(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.artifacts
            .iter()
            .map(|(path, bytes)| (path.as_str(), bytes.as_slice()))
    }

    /// Look up a single artifact
    pub fn artifact(&self, path: &str) -> Option<&[u8]> {
        self.artifacts.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn metadata(&self) -> &BuildMetadata {
        &self.metadata
    }

    /// Total artifact size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.artifacts.values().map(|b| b.len() as u64).sum()
    }

    /// Copy of the bundle without non-deterministic metadata
    #[must_use]
    pub fn stripped(&self) -> Self {
        Self {
            artifacts: self.artifacts.clone(),
            metadata: BuildMetadata::default(),
        }
    }

    /// SHA256 over artifact paths and contents; metadata is ignored
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, bytes) in &self.artifacts {
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        hex::encode(hasher.finalize())
    }

    /// Collect every regular file under `dir` into a bundle
    pub fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let mut bundle = Self::new();
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(std::io::Error::other)?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            bundle
                .insert(key, std::fs::read(entry.path())?)
                .map_err(std::io::Error::other)?;
        }
        Ok(bundle)
    }

    /// Write every artifact below `dir`
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        for (path, bytes) in &self.artifacts {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, bytes)?;
        }
        Ok(())
    }
}

/// Whether an artifact path is relative and free of `..`, `.` and roots
fn is_contained(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Final compiled program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    /// File name of the program
    pub name: String,
    /// Program bytes
    pub contents: Vec<u8>,
    pub metadata: BuildMetadata,
}

impl Binary {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            metadata: BuildMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BuildMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// SHA256 of the program bytes
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.contents))
    }
}

/// Serde adapter storing artifact bytes as hex strings
mod hex_artifacts {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        artifacts: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(artifacts.iter().map(|(k, v)| (k, hex::encode(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                if !super::is_contained(&k) {
                    return Err(D::Error::custom(format!(
                        "artifact path '{k}' escapes the bundle"
                    )));
                }
                hex::decode(&v).map(|bytes| (k, bytes)).map_err(D::Error::custom)
            })
            .collect()
    }
}
