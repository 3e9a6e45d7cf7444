//! Cache backing stores
//!
//! A [`CacheStore`] is the persistence behind the dependency cache. It only
//! moves entries in and out; validity checks (recipe and toolchain match,
//! timeouts, degradation to a miss) live in [`crate::core::cache`].
//!
//! - [`memory`] - In-process store, used for tests and single-shot builds
//! - [`fs`] - Content-addressed files on a local or shared filesystem
//! - [`http`] - Remote cache server

pub mod fs;
pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::core::cache::CacheEntry;
use crate::core::fingerprint::{Recipe, ToolchainVersion};
use crate::error::StoreError;

pub use fs::FsStore;
pub use http::HttpStore;
pub use memory::MemoryStore;

/// Result of writing an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Entry was written
    Stored,
    /// An entry for the recipe already existed; nothing was written
    AlreadyPresent,
}

/// Key/value persistence addressed by recipe
///
/// Implementations must report an unreachable backend as
/// [`StoreError::Unavailable`] and a missing entry as `Ok(None)`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for log output
    fn name(&self) -> &'static str;

    /// Fetch the entry stored for `recipe`
    async fn get(&self, recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError>;

    /// Persist an entry; an existing entry for the same recipe is kept
    async fn put(&self, entry: &CacheEntry) -> Result<PutOutcome, StoreError>;

    /// Remove every entry
    async fn clear(&self) -> Result<(), StoreError>;

    /// Toolchain the store was last used with
    async fn read_stamp(&self) -> Result<Option<ToolchainVersion>, StoreError>;

    /// Record the toolchain the store is being used with
    async fn write_stamp(&self, toolchain: &ToolchainVersion) -> Result<(), StoreError>;

    /// Persist anything buffered
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
