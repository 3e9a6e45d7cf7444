//! In-memory cache store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CacheStore, PutOutcome};
use crate::core::cache::CacheEntry;
use crate::core::fingerprint::{Recipe, ToolchainVersion};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Recipe, CacheEntry>,
    stamp: Option<ToolchainVersion>,
}

/// Process-local store; contents are lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `recipe`, regardless of toolchain
    pub fn contains(&self, recipe: &Recipe) -> bool {
        self.lock().entries.contains_key(recipe)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.lock().entries.get(recipe).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<PutOutcome, StoreError> {
        let mut inner = self.lock();
        if inner.entries.contains_key(&entry.recipe) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        inner.entries.insert(entry.recipe.clone(), entry.clone());
        Ok(PutOutcome::Stored)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.lock().entries.clear();
        Ok(())
    }

    async fn read_stamp(&self) -> Result<Option<ToolchainVersion>, StoreError> {
        Ok(self.lock().stamp.clone())
    }

    async fn write_stamp(&self, toolchain: &ToolchainVersion) -> Result<(), StoreError> {
        self.lock().stamp = Some(toolchain.clone());
        Ok(())
    }
}
