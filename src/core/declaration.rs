//! Dependency declarations
//!
//! A declaration set is the resolved list of external dependencies for one
//! build. It never contains the project's own crates.

use serde::{Deserialize, Serialize};

use crate::error::FingerprintError;

/// A single resolved dependency
///
/// Field order matters: the derived `Ord` sorts by name, then version,
/// then source, then checksum, which is the canonical recipe order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name
    pub name: String,
    /// Exact version
    pub version: String,
    /// Source locator (registry URL, git URL with revision)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Checksum recorded by the lock file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Dependency {
    /// Create a dependency with only a name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: None,
            checksum: None,
        }
    }

    /// Set the source locator
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the checksum
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Check that this dependency is usable as recipe input
    pub fn ensure_resolved(&self) -> Result<(), FingerprintError> {
        if self.name.trim().is_empty() {
            return Err(FingerprintError::EmptyName);
        }
        if !is_exact_version(&self.version) {
            return Err(FingerprintError::UnresolvedDependency {
                name: self.name.clone(),
                version: self.version.clone(),
            });
        }
        Ok(())
    }
}

/// Whether a version string pins exactly one release.
///
/// Strict semver always qualifies. Shorter dotted pins such as `1.2` are
/// accepted as long as they carry no range operator or wildcard.
pub fn is_exact_version(version: &str) -> bool {
    if version.is_empty() || version.eq_ignore_ascii_case("latest") {
        return false;
    }
    if semver::Version::parse(version).is_ok() {
        return true;
    }
    if version
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '^' | '~' | '<' | '>' | '=' | '*' | ',' | '|'))
    {
        return false;
    }
    version
        .split('.')
        .all(|part| !part.is_empty() && !part.eq_ignore_ascii_case("x"))
}

/// Resolved dependency declarations for one build
///
/// Immutable once constructed. Declaration order is kept as given; the
/// fingerprinter is responsible for canonical ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationSet {
    dependencies: Vec<Dependency>,
}

impl DeclarationSet {
    /// Create a declaration set
    pub fn new(dependencies: Vec<Dependency>) -> Self {
        Self { dependencies }
    }

    /// Iterate over declarations in the order they were given
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter()
    }

    /// Number of declarations
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Fail on the first declaration that is not fully resolved
    pub fn ensure_resolved(&self) -> Result<(), FingerprintError> {
        self.dependencies.iter().try_for_each(Dependency::ensure_resolved)
    }

    /// Sorted, deduplicated copy of the declarations
    pub fn canonical(&self) -> Vec<Dependency> {
        let mut deps = self.dependencies.clone();
        deps.sort();
        deps.dedup();
        deps
    }
}

impl FromIterator<Dependency> for DeclarationSet {
    fn from_iter<T: IntoIterator<Item = Dependency>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
