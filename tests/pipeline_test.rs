//! Integration tests for the build pipeline
//!
//! Covers the full build flow over a real lock file: cache misses and hits,
//! toolchain upgrades, failure isolation, degraded caches and cancellation.

mod common;

use common::{
    open_cache, pipeline, pipeline_into, sample_declarations, CountingToolchain, HangingStore,
    StaticResolver, TestProject, UnavailableStore, SAMPLE_LOCK,
};
use stagehand::core::cache::DependencyCache;
use stagehand::core::declaration::{DeclarationSet, Dependency};
use stagehand::core::fingerprint::{compute_recipe, TargetPlatform, ToolchainVersion};
use stagehand::core::packager::{EntryKind, Packager, RuntimeRequirement};
use stagehand::error::{BuildError, FingerprintError, ResolutionError, ToolchainError};
use stagehand::infra::store::{CacheStore, FsStore, MemoryStore};
use stagehand::{CacheStatus, Pipeline, Stage};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================
// End-to-end scenario
// ============================================

/// First build misses and stores, second build hits, a toolchain upgrade
/// forces a full rebuild
#[tokio::test]
async fn test_miss_hit_then_toolchain_upgrade() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let store = Arc::new(MemoryStore::new());

    // First build: v7, empty cache
    let v7 = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(store.clone(), &v7).await;
    let first = pipeline(&project, v7.clone(), cache.clone())
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert!(first.compiled_dependencies);
    assert_eq!(
        first.stages,
        vec![
            Stage::Fingerprinting,
            Stage::CacheLookup,
            Stage::CacheMiss,
            Stage::Compiling,
            Stage::Packaging,
            Stage::Done,
        ]
    );
    assert!(first.warnings.is_empty());
    assert_eq!(v7.dependency_builds(), 1);
    assert!(store.contains(&first.recipe));

    // Second build: same declarations, same toolchain
    let second = pipeline(&project, v7.clone(), cache.clone())
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert!(!second.compiled_dependencies);
    assert_eq!(second.stages[2], Stage::CacheHit);
    assert_eq!(second.recipe, first.recipe);
    assert_eq!(v7.dependency_builds(), 1, "hit must not recompile dependencies");
    assert_eq!(v7.project_builds(), 2);
    assert_eq!(
        second.output.binary_entry().unwrap().sha256,
        first.output.binary_entry().unwrap().sha256,
        "binary must be identical on a hit"
    );

    // Third build: toolchain upgraded to v8
    let v8 = Arc::new(CountingToolchain::new("v8"));
    let upgraded = open_cache(store.clone(), &v8).await;
    let third = pipeline(&project, v8.clone(), upgraded)
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(third.cache_status, CacheStatus::Miss);
    assert!(third.compiled_dependencies);
    assert_ne!(third.recipe, first.recipe);
    assert_eq!(v8.dependency_builds(), 1);
    assert!(!store.contains(&first.recipe), "v7 entries are invalidated");
}

#[tokio::test]
async fn test_output_holds_only_binary_and_requirements() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    project.create_file("host/ca.crt", "-----BEGIN CERTIFICATE-----\n");
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(MemoryStore::new()), &toolchain).await;

    let report = pipeline(&project, toolchain, cache)
        .with_runtime_requirements(vec![RuntimeRequirement::new(
            project.path().join("host/ca.crt"),
            "etc/ssl/certs/ca.crt",
        )])
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    let kinds: Vec<_> = report.output.closure().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EntryKind::Binary, EntryKind::Runtime]);
    assert!(report.output.binary.ends_with("usr/local/bin/app"));
    report.output.verify().unwrap();

    // nothing from the dependency bundle leaks into the output
    for entry in walkdir::WalkDir::new(&report.output.root) {
        let entry = entry.unwrap();
        assert_ne!(entry.path().extension().and_then(|e| e.to_str()), Some("rlib"));
    }
}

#[tokio::test]
async fn test_source_edit_keeps_recipe() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(MemoryStore::new()), &toolchain).await;
    let pipeline = pipeline(&project, toolchain.clone(), cache);

    let before = pipeline
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();
    project.create_file("src/main.rs", "fn main() { println!(\"changed\"); }\n");
    let after = pipeline
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(before.recipe, after.recipe);
    assert_eq!(after.cache_status, CacheStatus::Hit);
    assert_eq!(toolchain.dependency_builds(), 1);
    assert_ne!(
        before.output.binary_entry().unwrap().sha256,
        after.output.binary_entry().unwrap().sha256
    );
}

#[tokio::test]
async fn test_filesystem_cache_survives_new_handles() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let cache_dir = TempDir::new().unwrap();
    let toolchain = Arc::new(CountingToolchain::new("v7"));

    for _ in 0..2 {
        let store: Arc<dyn CacheStore> = Arc::new(FsStore::new(cache_dir.path()));
        let cache = open_cache(store, &toolchain).await;
        let pipeline = pipeline(&project, toolchain.clone(), cache);
        pipeline
            .run(&project.metadata(), &project.source(), &CancellationToken::new())
            .await
            .unwrap();
        pipeline.close().await.unwrap();
    }

    assert_eq!(toolchain.dependency_builds(), 1);
    assert_eq!(toolchain.project_builds(), 2);
}

// ============================================
// Failures
// ============================================

#[tokio::test]
async fn test_dependency_failure_is_propagated_and_not_stored() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let store = Arc::new(MemoryStore::new());
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    toolchain.fail_dependencies(true);
    let cache = open_cache(store.clone(), &toolchain).await;

    let err = pipeline(&project, toolchain.clone(), cache)
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        BuildError::Toolchain(ToolchainError::CompilationFailed { diagnostics, .. }) => {
            assert!(diagnostics.contains("could not compile `libB`"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.is_empty());
    assert_eq!(toolchain.project_builds(), 0);
    assert!(!project.output_dir().exists());
}

#[tokio::test]
async fn test_project_failure_keeps_dependencies_cached() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let store = Arc::new(MemoryStore::new());
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    toolchain.fail_project(true);
    let cache = open_cache(store.clone(), &toolchain).await;
    let pipeline = pipeline(&project, toolchain.clone(), cache);

    let err = pipeline
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("E0425"));
    assert_eq!(store.len(), 1);

    toolchain.fail_project(false);
    let report = pipeline
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.cache_status, CacheStatus::Hit);
    assert_eq!(toolchain.dependency_builds(), 1);
}

#[tokio::test]
async fn test_unresolved_declaration_is_rejected_before_compiling() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(MemoryStore::new()), &toolchain).await;
    let resolver = StaticResolver(DeclarationSet::new(vec![
        Dependency::new("libA", "1.2"),
        Dependency::new("libB", "^3.0"),
    ]));

    let pipeline = Pipeline::new(
        Arc::new(resolver),
        toolchain.clone(),
        cache,
        Packager::new(project.output_dir()),
        TargetPlatform::new("linux-x64"),
    )
    .unwrap();
    let err = pipeline
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BuildError::Fingerprint(FingerprintError::UnresolvedDependency { ref name, .. })
            if name == "libB"
    ));
    assert_eq!(toolchain.dependency_builds(), 0);
}

#[tokio::test]
async fn test_missing_lock_file_is_resolution_error() {
    let project = TestProject::new();
    project.create_file("Cargo.toml", common::SAMPLE_MANIFEST);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(MemoryStore::new()), &toolchain).await;

    let err = pipeline(&project, toolchain, cache)
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BuildError::Resolution(ResolutionError::LockfileNotFound { .. })
    ));
}

#[tokio::test]
async fn test_mismatched_cache_handle_is_refused() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let v7 = Arc::new(CountingToolchain::new("v7"));
    let v8 = Arc::new(CountingToolchain::new("v8"));
    let cache = open_cache(Arc::new(MemoryStore::new()), &v7).await;

    let err = Pipeline::new(
        Arc::new(StaticResolver(sample_declarations())),
        v8,
        cache,
        Packager::new(project.output_dir()),
        TargetPlatform::new("linux-x64"),
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::ToolchainMismatch { .. }));
}

// ============================================
// Degraded cache
// ============================================

#[tokio::test]
async fn test_unavailable_cache_still_builds() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(UnavailableStore), &toolchain).await;

    let report = pipeline(&project, toolchain.clone(), cache)
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.cache_status, CacheStatus::Unavailable);
    assert!(report.compiled_dependencies);
    assert_eq!(report.warnings.len(), 2, "lookup and store warnings: {:?}", report.warnings);
    report.output.verify().unwrap();
}

#[tokio::test]
async fn test_hanging_cache_times_out_and_builds() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(HangingStore), &toolchain).await;

    let report = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        pipeline(&project, toolchain.clone(), cache).run(
            &project.metadata(),
            &project.source(),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("build must not hang on the cache")
    .unwrap();

    assert_eq!(report.cache_status, CacheStatus::Unavailable);
    assert!(report.warnings.iter().any(|w| w.contains("timed out")));
    assert_eq!(toolchain.project_builds(), 1);
}

// ============================================
// Cancellation
// ============================================

#[tokio::test]
async fn test_cancel_before_start() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = open_cache(Arc::new(MemoryStore::new()), &toolchain).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline(&project, toolchain.clone(), cache)
        .run(&project.metadata(), &project.source(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Cancelled { stage: Stage::Fingerprinting }));
    assert_eq!(toolchain.dependency_builds(), 0);
}

#[tokio::test]
async fn test_cancel_during_dependency_compile_stores_nothing() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let store = Arc::new(MemoryStore::new());
    let toolchain = Arc::new(
        CountingToolchain::new("v7").with_delay(std::time::Duration::from_secs(30)),
    );
    let cache = open_cache(store.clone(), &toolchain).await;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = pipeline(&project, toolchain.clone(), cache)
        .run(&project.metadata(), &project.source(), &cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, BuildError::Cancelled { stage: Stage::Compiling }));
    assert_eq!(toolchain.dependency_builds(), 1);
    assert!(store.is_empty());
    assert!(!project.output_dir().exists());
}

// ============================================
// Recipes
// ============================================

#[tokio::test]
async fn test_report_recipe_matches_fingerprinter() {
    let project = TestProject::with_lock(SAMPLE_LOCK);
    let toolchain = Arc::new(CountingToolchain::new("v7"));
    let cache = Arc::new(
        DependencyCache::open(
            Arc::new(MemoryStore::new()),
            ToolchainVersion::new("v7"),
            common::fast_options(),
        )
        .await,
    );
    let other_output = TempDir::new().unwrap();

    let report = pipeline_into(other_output.path(), toolchain, cache)
        .run(&project.metadata(), &project.source(), &CancellationToken::new())
        .await
        .unwrap();

    let expected = compute_recipe(
        &sample_declarations(),
        &TargetPlatform::new("linux-x64"),
        &ToolchainVersion::new("v7"),
    )
    .unwrap();
    assert_eq!(report.recipe, expected.recipe);
    assert_eq!(report.fingerprint, expected);
}
