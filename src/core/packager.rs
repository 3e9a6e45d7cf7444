//! Runtime packaging
//!
//! Writes the final binary and its declared runtime requirements into an
//! output directory and nothing else. Intermediate build state is refused,
//! and [`BuildOutput::verify`] checks that the directory holds exactly the
//! recorded closure.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::config::defaults;
use crate::core::bundle::Binary;
use crate::error::PackageError;
use crate::infra::filesystem;

/// File extensions produced by compilers but never needed at runtime
const BUILD_ARTIFACT_EXTENSIONS: &[&str] = &["o", "obj", "rlib", "rmeta", "a", "d", "pdb"];

/// Directory names that only exist in build trees
const BUILD_STATE_DIRS: &[&str] = &["target", "incremental", ".fingerprint", "deps"];

/// A host file the binary needs at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRequirement {
    /// File on the build host
    pub source: PathBuf,
    /// Path relative to the output root
    pub destination: PathBuf,
}

impl RuntimeRequirement {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// TLS trust roots at their conventional location
    pub fn trust_roots() -> Self {
        let path = PathBuf::from(defaults::DEFAULT_TRUST_ROOTS);
        let destination = path
            .strip_prefix("/")
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());
        Self::new(path, destination)
    }
}

/// Role of a file in the runtime closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Binary,
    Runtime,
}

/// One file of the runtime closure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureEntry {
    /// Path relative to the output root
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub sha256: String,
}

/// Packaged binary plus its minimal runtime closure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub root: PathBuf,
    pub binary: PathBuf,
    pub entries: Vec<ClosureEntry>,
}

impl BuildOutput {
    /// Every file that belongs in the output
    pub fn closure(&self) -> &[ClosureEntry] {
        &self.entries
    }

    /// Closure entry of the binary
    pub fn binary_entry(&self) -> Option<&ClosureEntry> {
        self.entries.iter().find(|e| e.kind == EntryKind::Binary)
    }

    /// Check the output directory against the closure
    ///
    /// Fails on any file not in the closure, and on closure files that are
    /// missing or whose content changed.
    pub fn verify(&self) -> Result<(), PackageError> {
        let expected: BTreeSet<&Path> = self.entries.iter().map(|e| e.path.as_path()).collect();

        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| PackageError::Io {
                path: self.root.clone(),
                error: e.to_string(),
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or_else(|_| entry.path());
            if !expected.contains(relative) {
                return Err(PackageError::UnexpectedFile {
                    path: entry.path().to_path_buf(),
                });
            }
        }

        for entry in &self.entries {
            let path = self.root.join(&entry.path);
            if !path.is_file() {
                return Err(PackageError::MissingRequirement { path });
            }
            let contents = filesystem::read_file(&path)?;
            if hex::encode(Sha256::digest(&contents)) != entry.sha256 {
                return Err(PackageError::Io {
                    path,
                    error: "content does not match the recorded checksum".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Pretty JSON description of the output
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Assembles build outputs
#[derive(Debug, Clone)]
pub struct Packager {
    output_dir: PathBuf,
    binary_dir: PathBuf,
    overwrite: bool,
}

impl Packager {
    /// Packager writing to `output_dir`, binary under `usr/local/bin`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            binary_dir: PathBuf::from(defaults::DEFAULT_BINARY_DIR),
            overwrite: false,
        }
    }

    /// Directory, relative to the output root, that receives the binary
    #[must_use]
    pub fn with_binary_dir(mut self, binary_dir: impl Into<PathBuf>) -> Self {
        self.binary_dir = binary_dir.into();
        self
    }

    /// Clear a non-empty output directory instead of refusing it
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Check runtime requirements without touching the output
    pub fn validate(&self, requirements: &[RuntimeRequirement]) -> Result<(), PackageError> {
        ensure_contained(&self.binary_dir)?;

        let mut seen = BTreeSet::new();
        for requirement in requirements {
            reject_build_state(&requirement.source)?;
            reject_build_state(&requirement.destination)?;
            ensure_contained(&requirement.destination)?;

            let destination = normalized(&requirement.destination);
            if !seen.insert(destination.clone()) {
                return Err(PackageError::DuplicateEntry { path: destination });
            }
            if !requirement.source.is_file() {
                return Err(PackageError::MissingRequirement {
                    path: requirement.source.clone(),
                });
            }
        }
        Ok(())
    }

    /// Write `binary` and `requirements` into the output directory
    pub fn package(
        &self,
        binary: &Binary,
        requirements: &[RuntimeRequirement],
    ) -> Result<BuildOutput, PackageError> {
        if binary.contents.is_empty() {
            return Err(PackageError::EmptyBinary {
                name: binary.name.clone(),
            });
        }
        let mut components = Path::new(&binary.name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(PackageError::InvalidBinaryName {
                name: binary.name.clone(),
            });
        }

        self.validate(requirements)?;
        let binary_path = normalized(&self.binary_dir.join(&binary.name));
        if requirements
            .iter()
            .any(|r| normalized(&r.destination) == binary_path)
        {
            return Err(PackageError::DuplicateEntry { path: binary_path });
        }

        if !filesystem::is_empty_dir(&self.output_dir)? {
            if !self.overwrite {
                return Err(PackageError::OutputNotEmpty {
                    path: self.output_dir.clone(),
                });
            }
            tracing::debug!("Clearing output directory {}", self.output_dir.display());
            filesystem::clear_dir(&self.output_dir)?;
        }
        filesystem::create_dir_all(&self.output_dir)?;

        let mut entries = Vec::with_capacity(requirements.len() + 1);

        let target = self.output_dir.join(&binary_path);
        filesystem::write_file(&target, &binary.contents)?;
        filesystem::set_executable(&target)?;
        entries.push(closure_entry(binary_path, EntryKind::Binary, &binary.contents));

        for requirement in requirements {
            let destination = normalized(&requirement.destination);
            let contents = filesystem::read_file(&requirement.source)?;
            filesystem::write_file(&self.output_dir.join(&destination), &contents)?;
            entries.push(closure_entry(destination, EntryKind::Runtime, &contents));
        }

        tracing::info!(
            "Packaged {} into {} ({} files)",
            binary.name,
            self.output_dir.display(),
            entries.len()
        );
        Ok(BuildOutput {
            root: self.output_dir.clone(),
            binary: target,
            entries,
        })
    }
}

fn closure_entry(path: PathBuf, kind: EntryKind, contents: &[u8]) -> ClosureEntry {
    ClosureEntry {
        path,
        kind,
        size: contents.len() as u64,
        sha256: hex::encode(Sha256::digest(contents)),
    }
}

/// Destination must be relative and never climb out of the output root
fn ensure_contained(path: &Path) -> Result<(), PackageError> {
    let contained = path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if contained {
        Ok(())
    } else {
        Err(PackageError::InvalidDestination {
            path: path.to_path_buf(),
        })
    }
}

/// Drop `.` components so equivalent spellings compare equal
fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn reject_build_state(path: &Path) -> Result<(), PackageError> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if BUILD_ARTIFACT_EXTENSIONS.contains(&ext) {
            return Err(PackageError::BuildArtifact {
                path: path.to_path_buf(),
                reason: format!("'.{ext}' files are intermediate build output"),
            });
        }
    }
    for component in path.components() {
        if let Some(name) = component.as_os_str().to_str() {
            if let Some(dir) = BUILD_STATE_DIRS.iter().find(|d| **d == name) {
                return Err(PackageError::BuildArtifact {
                    path: path.to_path_buf(),
                    reason: format!("paths through '{dir}' are build state"),
                });
            }
        }
    }
    Ok(())
}
