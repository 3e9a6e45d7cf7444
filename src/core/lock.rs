//! Lock file handling
//!
//! Reads Cargo-format lock files (`Cargo.lock`). The lock file records the
//! exact version, source and checksum of every package in the build graph.

use serde::Deserialize;

/// Newest lock file format understood
pub const MAX_LOCK_VERSION: u32 = 4;

/// Lock file structure
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LockFile {
    /// Lock file format version; absent in the oldest format
    #[serde(default)]
    pub version: Option<u32>,

    /// Locked packages
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

/// A locked package entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LockedPackage {
    pub name: String,

    /// Exact version
    pub version: String,

    /// Source locator (`registry+<url>`, `git+<url>#<sha>`); absent for
    /// workspace members and path dependencies
    #[serde(default)]
    pub source: Option<String>,

    /// SHA256 checksum of the package archive
    #[serde(default)]
    pub checksum: Option<String>,
}

impl LockedPackage {
    /// Whether the package comes from outside the project tree
    pub fn is_external(&self) -> bool {
        self.source.is_some()
    }
}

impl LockFile {
    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Packages that are not part of the project itself
    pub fn external_packages(&self) -> impl Iterator<Item = &LockedPackage> {
        self.packages.iter().filter(|p| p.is_external())
    }
}
