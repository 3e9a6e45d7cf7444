//! Build executor
//!
//! Runs the toolchain for one build. On a cache hit only the project is
//! compiled; on a miss the dependencies are compiled first, stored, and
//! then the project is compiled against them.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::bundle::{Binary, CompiledDependencyBundle};
use crate::core::cache::DependencyCache;
use crate::core::fingerprint::Fingerprint;
use crate::core::manifest::ProjectSource;
use crate::core::pipeline::Stage;
use crate::error::{BuildError, CacheError};
use crate::infra::store::PutOutcome;
use crate::infra::toolchain::Toolchain;

/// What the executor produced
#[derive(Debug)]
pub struct ExecutorOutput {
    pub binary: Binary,
    /// Whether the dependency stage ran in this build
    pub compiled_dependencies: bool,
    /// Result of storing freshly compiled dependencies, if attempted
    pub store: Option<Result<PutOutcome, CacheError>>,
}

/// Drives the toolchain for the compile stage
#[derive(Clone)]
pub struct BuildExecutor {
    toolchain: Arc<dyn Toolchain>,
}

impl BuildExecutor {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &Arc<dyn Toolchain> {
        &self.toolchain
    }

    /// Compile the project, and its dependencies when `cached` is `None`
    ///
    /// Dependencies that fail to compile are never stored. A store failure
    /// is reported in the output and does not fail the build. Cancellation
    /// is observed between and during toolchain calls; a bundle compiled
    /// before cancellation is not stored.
    pub async fn build(
        &self,
        fingerprint: &Fingerprint,
        cached: Option<CompiledDependencyBundle>,
        source: &ProjectSource,
        cache: &DependencyCache,
        cancel: &CancellationToken,
    ) -> Result<ExecutorOutput, BuildError> {
        let (bundle, compiled_dependencies, store) = match cached {
            Some(bundle) => (bundle, false, None),
            None => {
                tracing::info!(
                    recipe = fingerprint.recipe.short(),
                    "Compiling {} dependencies",
                    fingerprint.dependencies.len()
                );
                let declarations = fingerprint.declarations();
                let bundle = cancellable(
                    cancel,
                    self.toolchain
                        .compile_dependencies(&declarations, &fingerprint.platform),
                )
                .await??;

                if cancel.is_cancelled() {
                    return Err(BuildError::Cancelled {
                        stage: Stage::Compiling,
                    });
                }

                let stored = cache.store(&fingerprint.recipe, &bundle).await;
                if let Err(e) = &stored {
                    tracing::warn!(
                        recipe = fingerprint.recipe.short(),
                        "Could not store compiled dependencies: {}",
                        e
                    );
                }
                (bundle, true, Some(stored))
            }
        };

        tracing::info!("Compiling project");
        let binary =
            cancellable(cancel, self.toolchain.compile_project(source, &bundle)).await??;

        Ok(ExecutorOutput {
            binary,
            compiled_dependencies,
            store,
        })
    }
}

/// Await `work` unless `cancel` fires first
///
/// Dropping the losing future stops it; command toolchains kill their child
/// process on drop.
async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = T>,
) -> Result<T, BuildError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BuildError::Cancelled { stage: Stage::Compiling }),
        output = work => Ok(output),
    }
}
