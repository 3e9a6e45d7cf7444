//! Build pipeline
//!
//! Wires the stages of one build together:
//!
//! ```text
//! Fingerprinting -> CacheLookup -> CacheHit | CacheMiss -> Compiling -> Packaging -> Done
//! ```
//!
//! `Failed` is entered from `Compiling` or `Packaging`. Resolution errors
//! and unresolved declarations are rejected before the first stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::bundle::Binary;
use crate::core::cache::{CacheLookup, DependencyCache};
use crate::core::executor::BuildExecutor;
use crate::core::fingerprint::{
    compute_recipe, Fingerprint, Recipe, TargetPlatform, ToolchainVersion,
};
use crate::core::manifest::{ProjectMetadata, ProjectSource};
use crate::core::packager::{BuildOutput, Packager, RuntimeRequirement};
use crate::core::resolver::{DependencyResolver, LockfileResolver};
use crate::core::settings::StagehandConfig;
use crate::error::{BuildError, CacheError, PackageError, SettingsError};
use crate::infra::dirs::StagehandDirs;
use crate::infra::toolchain::{CommandToolchain, Toolchain};

/// Build stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fingerprinting,
    CacheLookup,
    CacheHit,
    CacheMiss,
    Compiling,
    Packaging,
    Done,
    Failed,
}

impl Stage {
    /// Whether a build may move from `self` to `next`
    pub fn can_transition_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Self::Fingerprinting, Self::CacheLookup)
                | (Self::CacheLookup, Self::CacheHit | Self::CacheMiss)
                | (Self::CacheHit | Self::CacheMiss, Self::Compiling)
                | (Self::Compiling, Self::Packaging | Self::Failed)
                | (Self::Packaging, Self::Done | Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fingerprinting => "fingerprinting",
            Self::CacheLookup => "cache lookup",
            Self::CacheHit => "cache hit",
            Self::CacheMiss => "cache miss",
            Self::Compiling => "compiling",
            Self::Packaging => "packaging",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the dependency cache answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Entry built by another toolchain
    Stale,
    /// Backend failed; treated as a miss
    Unavailable,
}

impl CacheStatus {
    pub fn is_hit(self) -> bool {
        self == CacheStatus::Hit
    }
}

/// Summary of a finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub recipe: Recipe,
    pub fingerprint: Fingerprint,
    pub cache_status: CacheStatus,
    /// Whether dependencies were compiled by this build
    pub compiled_dependencies: bool,
    /// Stages in the order they were entered
    pub stages: Vec<Stage>,
    pub output: BuildOutput,
    /// Non-fatal problems, such as a cache that could not be written
    pub warnings: Vec<String>,
}

/// Records stage transitions for one build
struct StageTrace {
    recipe: Option<Recipe>,
    stages: Vec<Stage>,
}

impl StageTrace {
    fn start() -> Self {
        tracing::info!(stage = %Stage::Fingerprinting, "Build started");
        Self {
            recipe: None,
            stages: vec![Stage::Fingerprinting],
        }
    }

    fn current(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Fingerprinting)
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.current().can_transition_to(next),
            "invalid transition {} -> {}",
            self.current(),
            next
        );
        tracing::info!(
            recipe = self.recipe.as_ref().map(Recipe::short),
            stage = %next,
            "Entering stage"
        );
        self.stages.push(next);
    }

    fn cancelled(&self) -> BuildError {
        tracing::warn!(stage = %self.current(), "Build cancelled");
        BuildError::Cancelled {
            stage: self.current(),
        }
    }

    fn fail(&mut self, error: BuildError) -> BuildError {
        if matches!(error, BuildError::Cancelled { .. }) {
            return error;
        }
        tracing::warn!(stage = %self.current(), "Build failed: {}", error);
        self.advance(Stage::Failed);
        error
    }
}

/// A configured build pipeline
///
/// One pipeline can run many builds, sequentially or concurrently; builds
/// share its dependency cache.
pub struct Pipeline {
    resolver: Arc<dyn DependencyResolver>,
    executor: BuildExecutor,
    cache: Arc<DependencyCache>,
    packager: Packager,
    platform: TargetPlatform,
    runtime: Vec<RuntimeRequirement>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("cache", &self.cache)
            .field("packager", &self.packager)
            .field("platform", &self.platform)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators
    ///
    /// Fails if the cache handle was opened for a different toolchain than
    /// the one that will compile.
    pub fn new(
        resolver: Arc<dyn DependencyResolver>,
        toolchain: Arc<dyn Toolchain>,
        cache: Arc<DependencyCache>,
        packager: Packager,
        platform: TargetPlatform,
    ) -> Result<Self, BuildError> {
        if cache.toolchain() != toolchain.version() {
            return Err(BuildError::ToolchainMismatch {
                cache: cache.toolchain().to_string(),
                toolchain: toolchain.version().to_string(),
            });
        }
        Ok(Self {
            resolver,
            executor: BuildExecutor::new(toolchain),
            cache,
            packager,
            platform,
            runtime: Vec::new(),
        })
    }

    /// Files to ship next to the binary
    #[must_use]
    pub fn with_runtime_requirements(mut self, requirements: Vec<RuntimeRequirement>) -> Self {
        self.runtime = requirements;
        self
    }

    /// Assemble a pipeline from configuration
    ///
    /// Uses the lock file resolver and the command toolchain. The toolchain
    /// version is taken from the configuration or detected by running the
    /// version command.
    pub async fn from_config(
        config: &StagehandConfig,
        project_root: &Path,
        dirs: &StagehandDirs,
    ) -> Result<Self, BuildError> {
        let required = |command: &Vec<String>, field: &str| {
            if command.is_empty() {
                Err(SettingsError::MissingField {
                    field: field.to_string(),
                })
            } else {
                Ok(command.clone())
            }
        };
        let dependencies = required(&config.toolchain.dependencies, "toolchain.dependencies")?;
        let project = required(&config.toolchain.project, "toolchain.project")?;

        let binary_name = match &config.package.binary_name {
            Some(name) => name.clone(),
            None => ProjectMetadata::discover(project_root)?
                .name
                .ok_or_else(|| SettingsError::MissingField {
                    field: "package.binary_name".to_string(),
                })?,
        };

        let version = match &config.toolchain.version {
            Some(version) => ToolchainVersion::new(version),
            None => CommandToolchain::detect_version(&config.version_command()).await?,
        };
        let platform = config.platform();

        let mut toolchain = CommandToolchain::new(
            version,
            platform.clone(),
            dependencies,
            project,
            &binary_name,
            config.work_dir(project_root),
        )?
        .with_env(config.toolchain.env.clone());
        if let Some(jobs) = config.toolchain.jobs {
            toolchain = toolchain.with_jobs(jobs);
        }

        let store = config.open_store(dirs)?;
        let cache = DependencyCache::open(
            store,
            toolchain.version().clone(),
            config.cache_options(),
        )
        .await;
        tracing::info!(
            "Pipeline ready: {} toolchain, {} cache, target {}",
            cache.toolchain(),
            cache.backend(),
            platform
        );

        Ok(Self::new(
            Arc::new(LockfileResolver::new()),
            Arc::new(toolchain),
            Arc::new(cache),
            config.packager(project_root),
            platform,
        )?
        .with_runtime_requirements(config.runtime_requirements()))
    }

    pub fn cache(&self) -> &Arc<DependencyCache> {
        &self.cache
    }

    pub fn platform(&self) -> &TargetPlatform {
        &self.platform
    }

    /// Run one build
    pub async fn run(
        &self,
        metadata: &ProjectMetadata,
        source: &ProjectSource,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        // Rejected before any stage runs
        let declarations = self.resolver.resolve(metadata)?;
        declarations.ensure_resolved()?;
        self.packager.validate(&self.runtime)?;

        let mut trace = StageTrace::start();
        let mut warnings = Vec::new();
        if cancel.is_cancelled() {
            return Err(trace.cancelled());
        }

        let fingerprint = compute_recipe(&declarations, &self.platform, self.cache.toolchain())?;
        trace.recipe = Some(fingerprint.recipe.clone());

        trace.advance(Stage::CacheLookup);
        if cancel.is_cancelled() {
            return Err(trace.cancelled());
        }
        let mut lookup = self.cache.lookup_detailed(&fingerprint.recipe).await;

        // Hold the recipe lease while compiling so a concurrent build of the
        // same dependencies waits and then hits.
        let mut lease = None;
        if !lookup.is_hit() {
            lease = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(trace.cancelled()),
                lease = self.cache.lease(&fingerprint.recipe) => lease,
            };
            if lease.is_some() && !matches!(lookup, CacheLookup::Unavailable(_)) {
                let again = self.cache.lookup_detailed(&fingerprint.recipe).await;
                if again.is_hit() {
                    tracing::info!(
                        recipe = fingerprint.recipe.short(),
                        "Dependencies were built by a concurrent build"
                    );
                    lookup = again;
                    lease = None;
                }
            }
        }

        let (cache_status, cached) = match lookup {
            CacheLookup::Hit(bundle) => (CacheStatus::Hit, Some(bundle)),
            CacheLookup::Miss => (CacheStatus::Miss, None),
            CacheLookup::Stale { toolchain } => {
                tracing::info!(
                    recipe = fingerprint.recipe.short(),
                    "Cached dependencies were built by {}, rebuilding",
                    toolchain
                );
                (CacheStatus::Stale, None)
            }
            CacheLookup::Unavailable(e) => {
                warnings.push(format!("Dependency cache unavailable, compiled from scratch: {e}"));
                (CacheStatus::Unavailable, None)
            }
        };
        trace.advance(if cache_status.is_hit() {
            Stage::CacheHit
        } else {
            Stage::CacheMiss
        });

        trace.advance(Stage::Compiling);
        let executed = self
            .executor
            .build(&fingerprint, cached, source, &self.cache, cancel)
            .await
            .map_err(|e| trace.fail(e))?;
        if let Some(Err(e)) = &executed.store {
            warnings.push(format!("Compiled dependencies were not cached: {e}"));
        }
        drop(lease);

        trace.advance(Stage::Packaging);
        if cancel.is_cancelled() {
            return Err(trace.cancelled());
        }
        let output = self
            .package(executed.binary)
            .await
            .map_err(|e| trace.fail(e.into()))?;

        trace.advance(Stage::Done);
        tracing::info!(
            recipe = fingerprint.recipe.short(),
            cache = ?cache_status,
            "Build finished: {}",
            output.binary.display()
        );

        Ok(BuildReport {
            recipe: fingerprint.recipe.clone(),
            fingerprint,
            cache_status,
            compiled_dependencies: executed.compiled_dependencies,
            stages: trace.stages,
            output,
            warnings,
        })
    }

    /// Flush the shared cache
    pub async fn close(self) -> Result<(), CacheError> {
        match Arc::try_unwrap(self.cache) {
            Ok(cache) => cache.close().await,
            Err(shared) => shared.flush().await,
        }
    }

    async fn package(&self, binary: Binary) -> Result<BuildOutput, PackageError> {
        let packager = self.packager.clone();
        let runtime = self.runtime.clone();
        tokio::task::spawn_blocking(move || packager.package(&binary, &runtime))
            .await
            .map_err(|e| PackageError::Io {
                path: self.packager.output_dir().to_path_buf(),
                error: e.to_string(),
            })?
    }
}
