//! Filesystem cache store
//!
//! Content-addressed layout under a root directory:
//!
//! ```text
//! <root>/toolchain                         toolchain stamp
//! <root>/entries/<prefix>/<recipe>.json    one file per entry
//! ```
//!
//! Entries are written to a temporary file and renamed into place, so
//! concurrent builders on a shared filesystem never observe a partial
//! entry. Two builders racing on the same recipe both rename identical
//! content; the last one wins.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{CacheStore, PutOutcome};
use crate::core::cache::CacheEntry;
use crate::core::fingerprint::{Recipe, ToolchainVersion};
use crate::error::StoreError;
use crate::infra::dirs::StagehandDirs;

const BACKEND: &str = "filesystem";
const ENTRIES_SUBDIR: &str = "entries";
const STAMP_FILE: &str = "toolchain";

/// Cache information
#[derive(Debug)]
pub struct CacheInfo {
    /// Cache directory path
    pub path: PathBuf,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Number of cached entries
    pub entry_count: usize,
    /// Whether cache exists
    pub exists: bool,
}

/// Cache store backed by a directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`; nothing is created until first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store in the platform default cache location
    pub fn from_dirs(dirs: &StagehandDirs) -> Self {
        Self::new(dirs.dependency_cache_dir())
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry file for a recipe
    ///
    /// The first two characters of the recipe fan entries out over
    /// subdirectories.
    pub fn entry_path(&self, recipe: &Recipe) -> PathBuf {
        self.entries_dir()
            .join(recipe.prefix())
            .join(format!("{recipe}.json"))
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join(ENTRIES_SUBDIR)
    }

    fn stamp_path(&self) -> PathBuf {
        self.root.join(STAMP_FILE)
    }

    /// Size and entry count of the store
    pub fn info(&self) -> CacheInfo {
        let entries = self.entries_dir();
        let files: Vec<_> = walkdir::WalkDir::new(&entries)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .collect();

        CacheInfo {
            path: self.root.clone(),
            size_bytes: files
                .iter()
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum(),
            entry_count: files.len(),
            exists: self.root.exists(),
        }
    }
}

#[async_trait]
impl CacheStore for FsStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError> {
        let path = self.entry_path(recipe);
        let recipe = recipe.clone();
        blocking(move || read_entry(&path, &recipe)).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<PutOutcome, StoreError> {
        let path = self.entry_path(&entry.recipe);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        let body = serde_json::to_vec(entry).map_err(|e| StoreError::Corrupt {
            key: entry.recipe.to_string(),
            reason: e.to_string(),
        })?;
        blocking(move || {
            write_atomic(&path, &body)?;
            Ok(PutOutcome::Stored)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let entries = self.entries_dir();
        blocking(move || match std::fs::remove_dir_all(&entries) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&entries, &e)),
        })
        .await
    }

    async fn read_stamp(&self) -> Result<Option<ToolchainVersion>, StoreError> {
        let path = self.stamp_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let stamp = content.trim();
                Ok((!stamp.is_empty()).then(|| ToolchainVersion::new(stamp)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&path, &e)),
        }
    }

    async fn write_stamp(&self, toolchain: &ToolchainVersion) -> Result<(), StoreError> {
        let path = self.stamp_path();
        let body = format!("{toolchain}\n").into_bytes();
        blocking(move || write_atomic(&path, &body)).await
    }
}

/// Run filesystem work off the async executor
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable {
            backend: BACKEND.to_string(),
            reason: format!("worker task failed: {e}"),
        })?
}

fn read_entry(path: &Path, recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(path, &e)),
    };

    let decoded = serde_json::from_slice::<CacheEntry>(&bytes)
        .map_err(|e| e.to_string())
        .and_then(|entry| {
            if entry.recipe == *recipe {
                Ok(entry)
            } else {
                Err(format!("entry file holds recipe {}", entry.recipe))
            }
        });

    match decoded {
        Ok(entry) => Ok(Some(entry)),
        Err(reason) => {
            // A corrupt file would otherwise shadow every future store
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Could not remove corrupt cache entry {}: {}", path.display(), e);
            }
            Err(StoreError::Corrupt {
                key: recipe.to_string(),
                reason,
            })
        }
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| unavailable(parent, &e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    std::fs::write(&temp, body).map_err(|e| StoreError::Io {
        path: temp.clone(),
        error: e.to_string(),
    })?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        StoreError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        }
    })
}

fn unavailable(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND.to_string(),
        reason: format!("{}: {error}", path.display()),
    }
}
