//! Test utilities for unit and property-based tests
//!
//! This module provides proptest generators and small fixtures.

use chrono::Utc;

use crate::core::bundle::CompiledDependencyBundle;
use crate::core::cache::CacheEntry;
use crate::core::declaration::{DeclarationSet, Dependency};
use crate::core::fingerprint::{compute_recipe, Recipe, TargetPlatform, ToolchainVersion};

/// Recipe for `{libA@1.2, libB@3.0}` on linux-x64 with toolchain v7
pub fn sample_recipe() -> Recipe {
    let declarations = DeclarationSet::new(vec![
        Dependency::new("libA", "1.2"),
        Dependency::new("libB", "3.0"),
    ]);
    compute_recipe(
        &declarations,
        &TargetPlatform::new("linux-x64"),
        &ToolchainVersion::new("v7"),
    )
    .expect("sample declarations are resolved")
    .recipe
}

/// Bundle with one artifact per sample dependency
pub fn sample_bundle() -> CompiledDependencyBundle {
    CompiledDependencyBundle::new()
        .with_artifact("deps/liblibA-1.2.rlib", b"libA 1.2 object code".to_vec())
        .and_then(|b| b.with_artifact("deps/liblibB-3.0.rlib", b"libB 3.0 object code".to_vec()))
        .expect("sample artifact paths are relative")
}

/// Cache entry for the sample recipe built by `toolchain`
pub fn sample_entry(toolchain: &str) -> CacheEntry {
    CacheEntry {
        recipe: sample_recipe(),
        toolchain: ToolchainVersion::new(toolchain),
        created_at: Utc::now(),
        bundle: sample_bundle(),
    }
}

pub mod generators {
    use proptest::prelude::*;

    use crate::core::declaration::Dependency;

    /// Generate a valid package name (lowercase alphanumeric with hyphens)
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a valid semver version string
    pub fn semver_version() -> impl Strategy<Value = String> {
        (0u32..100, 0u32..100, 0u32..100)
            .prop_map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
    }

    /// Generate a valid SHA256 hash (64 hex characters)
    pub fn sha256_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    /// Generate a resolved dependency, sometimes with source and checksum
    pub fn dependency() -> impl Strategy<Value = Dependency> {
        (
            package_name(),
            semver_version(),
            prop::option::of(Just(
                "registry+https://github.com/rust-lang/crates.io-index".to_string(),
            )),
            prop::option::of(sha256_hash()),
        )
            .prop_map(|(name, version, source, checksum)| Dependency {
                name,
                version,
                source,
                checksum,
            })
    }

    /// Generate a platform identifier
    pub fn target_platform() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("linux-x64".to_string()),
            Just("linux-arm64".to_string()),
            Just("x86_64-linux-musl".to_string()),
            Just("aarch64-apple-darwin".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::declaration::is_exact_version;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_package_name_generator(name in package_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_dependency_generator_is_resolved(dep in dependency()) {
            prop_assert!(is_exact_version(&dep.version));
            prop_assert!(dep.ensure_resolved().is_ok());
        }

        #[test]
        fn test_target_platform_generator(platform in target_platform()) {
            prop_assert!(!platform.is_empty());
        }
    }
}
