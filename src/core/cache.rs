//! Dependency cache
//!
//! Maps a [`Recipe`] to the [`CompiledDependencyBundle`] built for it.
//! The cache is an explicit handle: open it once per process over a
//! [`CacheStore`], share it between builds, and [`DependencyCache::close`]
//! it at the end.
//!
//! Cache faults never fail a build. Every store call is bounded by a
//! timeout, and an unavailable, slow or corrupt backend is reported as a
//! miss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::config::defaults;
use crate::core::bundle::CompiledDependencyBundle;
use crate::core::fingerprint::{Recipe, ToolchainVersion};
use crate::error::{CacheError, StoreError};
use crate::infra::store::{CacheStore, PutOutcome};

/// A stored bundle and the context it was built in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub recipe: Recipe,
    pub toolchain: ToolchainVersion,
    pub created_at: DateTime<Utc>,
    pub bundle: CompiledDependencyBundle,
}

/// Timeouts applied by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Upper bound for any single store call
    pub operation_timeout: Duration,
    /// Upper bound for waiting on another build's lease
    pub lease_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(defaults::CACHE_TIMEOUT_MS),
            lease_timeout: Duration::from_millis(defaults::LEASE_TIMEOUT_MS),
        }
    }
}

/// Outcome of a lookup, with the reason for a miss
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Valid entry found
    Hit(CompiledDependencyBundle),
    /// No entry for the recipe
    Miss,
    /// Entry exists but was built by another toolchain
    Stale { toolchain: ToolchainVersion },
    /// Backend failed; treated as a miss
    Unavailable(CacheError),
}

impl CacheLookup {
    /// The bundle on a hit, `None` otherwise
    pub fn into_bundle(self) -> Option<CompiledDependencyBundle> {
        match self {
            Self::Hit(bundle) => Some(bundle),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

type LeaseSlots = Arc<Mutex<HashMap<Recipe, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive right to build one recipe within this process
///
/// The recipe's slot is dropped from the lease table once no lease holds
/// it and nobody waits for it.
#[derive(Debug)]
pub struct RecipeLease {
    guard: Option<OwnedMutexGuard<()>>,
    leases: LeaseSlots,
    recipe: Recipe,
}

impl Drop for RecipeLease {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        remove_idle_slot(&mut leases, &self.recipe);
    }
}

// Callers hold the table lock, so no new waiter can clone the slot meanwhile
fn remove_idle_slot(
    leases: &mut HashMap<Recipe, Arc<tokio::sync::Mutex<()>>>,
    recipe: &Recipe,
) {
    if leases
        .get(recipe)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        leases.remove(recipe);
    }
}

/// Cache of compiled dependency bundles for one toolchain
pub struct DependencyCache {
    store: Arc<dyn CacheStore>,
    toolchain: ToolchainVersion,
    options: CacheOptions,
    leases: LeaseSlots,
}

impl std::fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCache")
            .field("store", &self.store.name())
            .field("toolchain", &self.toolchain)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DependencyCache {
    /// Open the cache for `toolchain`
    ///
    /// When the store was last used with a different toolchain every entry
    /// is invalidated before the handle is returned. Stamp failures are
    /// logged only: per-entry toolchain checks still apply.
    pub async fn open(
        store: Arc<dyn CacheStore>,
        toolchain: ToolchainVersion,
        options: CacheOptions,
    ) -> Self {
        let cache = Self {
            store,
            toolchain,
            options,
            leases: LeaseSlots::default(),
        };

        match cache.bounded("read stamp", cache.store.read_stamp()).await {
            Ok(Some(previous)) if previous == cache.toolchain => {}
            Ok(previous) => {
                if let Some(previous) = &previous {
                    tracing::info!(
                        "Toolchain changed from {} to {}, invalidating dependency cache",
                        previous,
                        cache.toolchain
                    );
                    if let Err(e) = cache.invalidate_all().await {
                        tracing::warn!("Could not invalidate dependency cache: {}", e);
                    }
                }
                if let Err(e) = cache
                    .bounded("write stamp", cache.store.write_stamp(&cache.toolchain))
                    .await
                {
                    tracing::warn!("Could not record toolchain stamp: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not read toolchain stamp: {}", e),
        }

        cache
    }

    /// Toolchain this handle validates entries against
    pub fn toolchain(&self) -> &ToolchainVersion {
        &self.toolchain
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    /// Backend name for log output
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Bundle for `recipe`, or `None` on any kind of miss
    pub async fn lookup(&self, recipe: &Recipe) -> Option<CompiledDependencyBundle> {
        self.lookup_detailed(recipe).await.into_bundle()
    }

    /// Look up `recipe` and report why it missed
    pub async fn lookup_detailed(&self, recipe: &Recipe) -> CacheLookup {
        match self.bounded("lookup", self.store.get(recipe)).await {
            Ok(Some(entry)) if entry.recipe != *recipe => {
                tracing::warn!(
                    recipe = recipe.short(),
                    "Cache returned an entry for another recipe, ignoring it"
                );
                CacheLookup::Miss
            }
            Ok(Some(entry)) if entry.toolchain != self.toolchain => {
                tracing::debug!(
                    recipe = recipe.short(),
                    entry_toolchain = %entry.toolchain,
                    "Cache entry built by another toolchain"
                );
                CacheLookup::Stale {
                    toolchain: entry.toolchain,
                }
            }
            Ok(Some(entry)) => {
                tracing::debug!(recipe = recipe.short(), "Cache hit");
                CacheLookup::Hit(entry.bundle)
            }
            Ok(None) => {
                tracing::debug!(recipe = recipe.short(), "Cache miss");
                CacheLookup::Miss
            }
            Err(e) => {
                tracing::warn!(
                    recipe = recipe.short(),
                    "Dependency cache unavailable, forcing a miss: {}",
                    e
                );
                CacheLookup::Unavailable(e)
            }
        }
    }

    /// Persist `bundle` under `recipe`
    ///
    /// Build metadata is stripped first. Storing a recipe that already has
    /// an entry is a no-op.
    pub async fn store(
        &self,
        recipe: &Recipe,
        bundle: &CompiledDependencyBundle,
    ) -> Result<PutOutcome, CacheError> {
        let entry = CacheEntry {
            recipe: recipe.clone(),
            toolchain: self.toolchain.clone(),
            created_at: Utc::now(),
            bundle: bundle.stripped(),
        };
        let outcome = self.bounded("store", self.store.put(&entry)).await?;
        tracing::debug!(recipe = recipe.short(), ?outcome, "Stored dependency bundle");
        Ok(outcome)
    }

    /// Drop every entry in the backing store
    pub async fn invalidate_all(&self) -> Result<(), CacheError> {
        self.bounded("invalidate", self.store.clear()).await
    }

    /// Wait for exclusive use of `recipe` among builds sharing this handle
    ///
    /// Returns `None` if the wait exceeds the lease timeout; the caller then
    /// proceeds without the lease and relies on idempotent stores.
    pub async fn lease(&self, recipe: &Recipe) -> Option<RecipeLease> {
        let slot = {
            let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
            leases
                .entry(recipe.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        match tokio::time::timeout(self.options.lease_timeout, slot.lock_owned()).await {
            Ok(guard) => Some(RecipeLease {
                guard: Some(guard),
                leases: Arc::clone(&self.leases),
                recipe: recipe.clone(),
            }),
            Err(_) => {
                let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
                remove_idle_slot(&mut leases, recipe);
                drop(leases);
                tracing::warn!(
                    recipe = recipe.short(),
                    "Timed out waiting for a concurrent build of the same dependencies"
                );
                None
            }
        }
    }

    /// Persist anything the backing store buffers
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.bounded("flush", self.store.flush()).await
    }

    /// Flush the backing store and release the handle
    pub async fn close(self) -> Result<(), CacheError> {
        self.flush().await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.options.operation_timeout, call).await {
            Ok(result) => result.map_err(|e| CacheError::from_store(operation, e)),
            Err(_) => Err(CacheError::Timeout {
                operation: operation.to_string(),
                millis: u64::try_from(self.options.operation_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
        }
    }
}
