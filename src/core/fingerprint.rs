//! Dependency fingerprinting
//!
//! Turns a resolved declaration set into a [`Recipe`]: a SHA256 digest of
//! the canonical dependency list, the target platform and the toolchain
//! version. The project's own source never contributes to a recipe, which
//! is what makes a recipe reusable across source edits.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::core::declaration::{DeclarationSet, Dependency};
use crate::error::FingerprintError;

/// Tag mixed into every recipe; bump when the serialization changes
const RECIPE_FORMAT: &str = "stagehand-recipe/v1";

/// Target platform identifier (e.g. "linux-x64", "aarch64-linux-musl")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetPlatform(String);

impl TargetPlatform {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Platform of the running host, as `<os>-<arch>`
    pub fn host() -> Self {
        Self(format!(
            "{}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the toolchain that compiles dependencies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolchainVersion(String);

impl ToolchainVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key: lowercase hex SHA256 of the canonical recipe inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Recipe(String);

impl Recipe {
    /// Length of a recipe in hex characters
    pub const LEN: usize = 64;

    /// Parse a recipe from its hex form
    ///
    /// Only 64 lowercase hex characters are accepted, so a recipe is always
    /// safe to use as a file name or URL segment.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == Self::LEN
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log output
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    /// Two-character prefix used to fan out storage directories
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Recipe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid recipe '{value}'"))
    }
}

impl From<Recipe> for String {
    fn from(recipe: Recipe) -> Self {
        recipe.0
    }
}

/// A recipe together with the inputs it was computed from
///
/// Serializes to the recipe document that can be written next to a build
/// for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub recipe: Recipe,
    pub platform: TargetPlatform,
    pub toolchain: ToolchainVersion,
    /// Canonically ordered, deduplicated dependencies
    pub dependencies: Vec<Dependency>,
}

impl Fingerprint {
    /// The dependencies as a declaration set
    pub fn declarations(&self) -> DeclarationSet {
        DeclarationSet::new(self.dependencies.clone())
    }

    /// Pretty JSON recipe document
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Compute the recipe for a declaration set
///
/// Pure function of its inputs: permutations and duplicates of the same
/// declarations yield the same recipe.
pub fn compute_recipe(
    declarations: &DeclarationSet,
    platform: &TargetPlatform,
    toolchain: &ToolchainVersion,
) -> Result<Fingerprint, FingerprintError> {
    if platform.as_str().trim().is_empty() {
        return Err(FingerprintError::EmptyPlatform);
    }
    declarations.ensure_resolved()?;

    let dependencies = declarations.canonical();

    let mut hasher = Sha256::new();
    update_field(&mut hasher, RECIPE_FORMAT);
    update_field(&mut hasher, platform.as_str());
    update_field(&mut hasher, toolchain.as_str());
    hasher.update((dependencies.len() as u64).to_le_bytes());
    for dep in &dependencies {
        update_field(&mut hasher, &dep.name);
        update_field(&mut hasher, &dep.version);
        update_field(&mut hasher, dep.source.as_deref().unwrap_or(""));
        update_field(&mut hasher, dep.checksum.as_deref().unwrap_or(""));
    }

    let recipe = Recipe(hex::encode(hasher.finalize()));
    tracing::debug!(
        recipe = recipe.short(),
        dependencies = dependencies.len(),
        "computed recipe"
    );

    Ok(Fingerprint {
        recipe,
        platform: platform.clone(),
        toolchain: toolchain.clone(),
        dependencies,
    })
}

// Length-prefixed so no two field sequences can collide
pub(crate) fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
