//! Configuration management
//!
//! Reads `stagehand.toml` from the project root, or `config.toml` from the
//! global config directory. Every table is optional; a missing file yields
//! the defaults.
//!
//! ```toml
//! [target]
//! platform = "x86_64-unknown-linux-musl"
//!
//! [cache]
//! backend = "http"            # "filesystem" (default), "http" or "memory"
//! url = "http://cache.internal:8080"
//! timeout_ms = 2000
//!
//! [toolchain]
//! version_command = ["rustc", "--version"]
//! dependencies = ["sh", "build-deps.sh"]
//! project = ["sh", "build-app.sh"]
//!
//! [package]
//! binary_name = "server"
//! trust_roots = true
//! runtime = [{ source = "/usr/share/zoneinfo/UTC", destination = "usr/share/zoneinfo/UTC" }]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::defaults;
use crate::core::cache::CacheOptions;
use crate::core::fingerprint::TargetPlatform;
use crate::core::packager::{Packager, RuntimeRequirement};
use crate::error::SettingsError;
use crate::infra::dirs::StagehandDirs;
use crate::infra::store::{CacheStore, FsStore, HttpStore, MemoryStore};

/// Configuration for stagehand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagehandConfig {
    /// Target platform settings
    #[serde(default)]
    pub target: TargetConfig,

    /// Dependency cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Toolchain commands
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Output packaging
    #[serde(default)]
    pub package: PackageConfig,
}

/// Target platform configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Platform identifier; the host platform when unset
    pub platform: Option<String>,
}

/// Which cache store to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Filesystem,
    Http,
    Memory,
}

/// Cache configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Filesystem store root; defaults to the user cache directory
    pub dir: Option<PathBuf>,

    /// HTTP store base URL
    pub url: Option<String>,

    /// Timeout for each store call, in milliseconds
    pub timeout_ms: Option<u64>,

    /// Wait for a concurrent build of the same recipe, in milliseconds
    pub lease_timeout_ms: Option<u64>,
}

/// Toolchain configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Explicit toolchain identity; wins over `version_command`
    pub version: Option<String>,

    /// Command whose first output line identifies the toolchain
    pub version_command: Option<Vec<String>>,

    /// Command compiling the dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Command compiling the project
    #[serde(default)]
    pub project: Vec<String>,

    /// Scratch space for toolchain runs
    pub work_dir: Option<PathBuf>,

    /// Parallel jobs passed to the toolchain
    pub jobs: Option<usize>,

    /// Extra environment for both commands
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Packaging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub output_dir: Option<PathBuf>,

    /// Binary file name; defaults to the package name
    pub binary_name: Option<String>,

    /// Binary location inside the output
    pub binary_dir: Option<PathBuf>,

    /// Replace a non-empty output directory
    #[serde(default)]
    pub overwrite: bool,

    /// Include the host's TLS trust roots
    #[serde(default)]
    pub trust_roots: bool,

    /// Additional runtime files
    #[serde(default)]
    pub runtime: Vec<RuntimeRequirement>,
}

impl StagehandConfig {
    /// Load the global configuration from the config directory
    pub fn load(dirs: &StagehandDirs) -> Result<Self, SettingsError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load `stagehand.toml` from a project root
    pub fn load_for_project(root: &Path) -> Result<Self, SettingsError> {
        Self::load_from_path(&root.join(defaults::CONFIG_FILE_NAME))
    }

    /// Load configuration from a specific path
    ///
    /// If the file doesn't exist, returns default configuration.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| SettingsError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Configured platform, or the host's
    pub fn platform(&self) -> TargetPlatform {
        self.target
            .platform
            .as_deref()
            .map_or_else(TargetPlatform::host, TargetPlatform::new)
    }

    pub fn cache_options(&self) -> CacheOptions {
        let defaults = CacheOptions::default();
        CacheOptions {
            operation_timeout: self
                .cache
                .timeout_ms
                .map_or(defaults.operation_timeout, Duration::from_millis),
            lease_timeout: self
                .cache
                .lease_timeout_ms
                .map_or(defaults.lease_timeout, Duration::from_millis),
        }
    }

    /// Build the configured cache store
    pub fn open_store(&self, dirs: &StagehandDirs) -> Result<Arc<dyn CacheStore>, SettingsError> {
        let store: Arc<dyn CacheStore> = match self.cache.backend {
            CacheBackend::Filesystem => match &self.cache.dir {
                Some(dir) => Arc::new(FsStore::new(dir)),
                None => Arc::new(FsStore::from_dirs(dirs)),
            },
            CacheBackend::Http => {
                let url = self.cache.url.as_deref().ok_or_else(|| SettingsError::MissingField {
                    field: "cache.url".to_string(),
                })?;
                Arc::new(HttpStore::with_timeout(
                    url,
                    self.cache_options().operation_timeout,
                )?)
            }
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
        };
        tracing::debug!("Using {} cache store", store.name());
        Ok(store)
    }

    /// Runtime files to package, trust roots first when enabled
    pub fn runtime_requirements(&self) -> Vec<RuntimeRequirement> {
        let mut requirements = Vec::with_capacity(self.package.runtime.len() + 1);
        if self.package.trust_roots {
            requirements.push(RuntimeRequirement::trust_roots());
        }
        requirements.extend(self.package.runtime.iter().cloned());
        requirements
    }

    /// Packager writing below `project_root` unless an absolute path is set
    pub fn packager(&self, project_root: &Path) -> Packager {
        let output = self
            .package
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_OUTPUT_DIR));
        let mut packager =
            Packager::new(project_root.join(output)).with_overwrite(self.package.overwrite);
        if let Some(dir) = &self.package.binary_dir {
            packager = packager.with_binary_dir(dir);
        }
        packager
    }

    /// Scratch directory for toolchain runs
    pub fn work_dir(&self, project_root: &Path) -> PathBuf {
        let dir = self
            .toolchain
            .work_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_WORK_DIR));
        project_root.join(dir)
    }

    /// Command identifying the toolchain
    pub fn version_command(&self) -> Vec<String> {
        self.toolchain.version_command.clone().unwrap_or_else(|| {
            defaults::DEFAULT_VERSION_COMMAND
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }
}
