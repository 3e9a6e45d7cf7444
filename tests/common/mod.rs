//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use stagehand::core::bundle::{Binary, BuildMetadata, CompiledDependencyBundle};
use stagehand::core::cache::{CacheEntry, CacheOptions, DependencyCache};
use stagehand::core::declaration::{DeclarationSet, Dependency};
use stagehand::core::fingerprint::{Recipe, TargetPlatform, ToolchainVersion};
use stagehand::core::manifest::{ProjectMetadata, ProjectSource};
use stagehand::core::packager::Packager;
use stagehand::core::resolver::{DependencyResolver, LockfileResolver};
use stagehand::error::{CompileStage, ResolutionError, StoreError, ToolchainError};
use stagehand::infra::store::{CacheStore, PutOutcome};
use stagehand::infra::toolchain::Toolchain;
use stagehand::Pipeline;

/// Test project context
///
/// Creates a temporary directory holding a small Cargo project.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create an empty project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Project with a manifest, a lock file and a main source file
    pub fn with_lock(lock: &str) -> Self {
        let project = Self::new();
        project.create_file("Cargo.toml", SAMPLE_MANIFEST);
        project.create_file("Cargo.lock", lock);
        project.create_file("src/main.rs", "fn main() { println!(\"hello\"); }\n");
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    pub fn metadata(&self) -> ProjectMetadata {
        ProjectMetadata::discover(self.dir.path()).expect("Failed to discover project")
    }

    pub fn source(&self) -> ProjectSource {
        ProjectSource::new(self.dir.path())
    }

    /// Output directory used by [`pipeline`]
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("dist")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample Cargo manifest
pub const SAMPLE_MANIFEST: &str = r#"
[package]
name = "app"
version = "0.1.0"
edition = "2021"

[dependencies]
libA = "1.2"
libB = "3.0"
"#;

/// Lock file for `{libA@1.2, libB@3.0}` plus the project itself
pub const SAMPLE_LOCK: &str = r#"
version = 4

[[package]]
name = "app"
version = "0.1.0"
dependencies = [
 "libA",
 "libB",
]

[[package]]
name = "libA"
version = "1.2"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "libB"
version = "3.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#;

/// The declarations in [`SAMPLE_LOCK`]
pub fn sample_declarations() -> DeclarationSet {
    let registry = "registry+https://github.com/rust-lang/crates.io-index";
    DeclarationSet::new(vec![
        Dependency::new("libA", "1.2").with_source(registry),
        Dependency::new("libB", "3.0").with_source(registry),
    ])
}

/// Resolver returning a fixed declaration set
pub struct StaticResolver(pub DeclarationSet);

impl DependencyResolver for StaticResolver {
    fn resolve(&self, _metadata: &ProjectMetadata) -> Result<DeclarationSet, ResolutionError> {
        Ok(self.0.clone())
    }
}

/// Toolchain fake that counts its invocations
///
/// Dependency artifacts and binaries are deterministic functions of the
/// inputs, so repeated builds can be compared by digest.
pub struct CountingToolchain {
    version: ToolchainVersion,
    dependency_builds: AtomicUsize,
    project_builds: AtomicUsize,
    fail_dependencies: AtomicBool,
    fail_project: AtomicBool,
    delay: Duration,
}

impl CountingToolchain {
    pub fn new(version: &str) -> Self {
        Self {
            version: ToolchainVersion::new(version),
            dependency_builds: AtomicUsize::new(0),
            project_builds: AtomicUsize::new(0),
            fail_dependencies: AtomicBool::new(false),
            fail_project: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    /// Make every compilation take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn dependency_builds(&self) -> usize {
        self.dependency_builds.load(Ordering::SeqCst)
    }

    pub fn project_builds(&self) -> usize {
        self.project_builds.load(Ordering::SeqCst)
    }

    pub fn fail_dependencies(&self, fail: bool) {
        self.fail_dependencies.store(fail, Ordering::SeqCst);
    }

    pub fn fail_project(&self, fail: bool) {
        self.fail_project.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Toolchain for CountingToolchain {
    fn version(&self) -> &ToolchainVersion {
        &self.version
    }

    async fn compile_dependencies(
        &self,
        declarations: &DeclarationSet,
        platform: &TargetPlatform,
    ) -> Result<CompiledDependencyBundle, ToolchainError> {
        self.dependency_builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_dependencies.load(Ordering::SeqCst) {
            return Err(ToolchainError::CompilationFailed {
                stage: CompileStage::Dependencies,
                status: Some(101),
                diagnostics: "error: could not compile `libB`".to_string(),
            });
        }

        let mut bundle = CompiledDependencyBundle::new().with_metadata(BuildMetadata::now());
        for dep in declarations.iter() {
            bundle
                .insert(
                    format!("deps/lib{}-{}.rlib", dep.name, dep.version),
                    format!("{} {} for {} by {}", dep.name, dep.version, platform, self.version),
                )
                .map_err(|e| ToolchainError::InvalidOutput {
                    message: e.to_string(),
                })?;
        }
        Ok(bundle)
    }

    async fn compile_project(
        &self,
        source: &ProjectSource,
        bundle: &CompiledDependencyBundle,
    ) -> Result<Binary, ToolchainError> {
        self.project_builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_project.load(Ordering::SeqCst) {
            return Err(ToolchainError::CompilationFailed {
                stage: CompileStage::Project,
                status: Some(1),
                diagnostics: "error[E0425]: cannot find value `x` in this scope".to_string(),
            });
        }

        let main = std::fs::read_to_string(source.root().join("src/main.rs")).unwrap_or_default();
        let contents = format!("\x7fELF\n{main}linked against {}\n", bundle.digest());
        Ok(Binary::new("app", contents).with_metadata(BuildMetadata::now()))
    }
}

/// Store whose backend is always down
pub struct UnavailableStore;

fn down() -> StoreError {
    StoreError::Unavailable {
        backend: "down".to_string(),
        reason: "connection refused".to_string(),
    }
}

#[async_trait]
impl CacheStore for UnavailableStore {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn get(&self, _recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError> {
        Err(down())
    }

    async fn put(&self, _entry: &CacheEntry) -> Result<PutOutcome, StoreError> {
        Err(down())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Err(down())
    }

    async fn read_stamp(&self) -> Result<Option<ToolchainVersion>, StoreError> {
        Err(down())
    }

    async fn write_stamp(&self, _toolchain: &ToolchainVersion) -> Result<(), StoreError> {
        Err(down())
    }
}

/// Store that never answers
pub struct HangingStore;

async fn hang<T>() -> T {
    std::future::pending().await
}

#[async_trait]
impl CacheStore for HangingStore {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn get(&self, _recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError> {
        hang().await
    }

    async fn put(&self, _entry: &CacheEntry) -> Result<PutOutcome, StoreError> {
        hang().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        hang().await
    }

    async fn read_stamp(&self) -> Result<Option<ToolchainVersion>, StoreError> {
        hang().await
    }

    async fn write_stamp(&self, _toolchain: &ToolchainVersion) -> Result<(), StoreError> {
        hang().await
    }
}

/// Cache options short enough for tests
pub fn fast_options() -> CacheOptions {
    CacheOptions {
        operation_timeout: Duration::from_millis(200),
        lease_timeout: Duration::from_secs(10),
    }
}

/// Open a cache for `toolchain` over `store`
pub async fn open_cache(
    store: Arc<dyn CacheStore>,
    toolchain: &CountingToolchain,
) -> Arc<DependencyCache> {
    Arc::new(DependencyCache::open(store, toolchain.version().clone(), fast_options()).await)
}

/// Pipeline resolving the project's lock file, writing to `<project>/dist`
pub fn pipeline(
    project: &TestProject,
    toolchain: Arc<CountingToolchain>,
    cache: Arc<DependencyCache>,
) -> Pipeline {
    pipeline_into(&project.output_dir(), toolchain, cache)
}

/// Pipeline writing to `output`, replacing earlier output
pub fn pipeline_into(
    output: &Path,
    toolchain: Arc<CountingToolchain>,
    cache: Arc<DependencyCache>,
) -> Pipeline {
    Pipeline::new(
        Arc::new(LockfileResolver::new()),
        toolchain,
        cache,
        Packager::new(output).with_overwrite(true),
        TargetPlatform::new("linux-x64"),
    )
    .expect("toolchain and cache agree")
}
