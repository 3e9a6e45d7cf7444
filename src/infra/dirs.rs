//! Platform-specific directory management
//!
//! Provides platform-specific paths for the dependency cache and the global
//! config file. Follows XDG Base Directory Specification on Linux and
//! standard locations on macOS.
//!
//! Environment variables can override default directories:
//! - `STAGEHAND_CACHE_DIR` - Override cache directory
//! - `STAGEHAND_CONFIG_DIR` - Override config directory

use std::env;
use std::path::PathBuf;

/// Environment variable names for directory overrides
pub const ENV_CACHE_DIR: &str = "STAGEHAND_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "STAGEHAND_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "stagehand";

const DEPENDENCY_CACHE_SUBDIR: &str = "dependencies";

/// Platform-specific directory provider for stagehand
#[derive(Debug, Clone)]
pub struct StagehandDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
}

impl StagehandDirs {
    /// Create a new `StagehandDirs` instance
    ///
    /// Checks environment variables first, then falls back to platform defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: Self::resolve(ENV_CACHE_DIR, dirs::cache_dir, ".cache"),
            config_dir: Self::resolve(ENV_CONFIG_DIR, dirs::config_dir, ".config"),
        }
    }

    /// Use explicit directories, ignoring environment and platform defaults
    #[must_use]
    pub fn with_paths(cache_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            config_dir,
        }
    }

    /// Get the cache directory path
    ///
    /// - Linux: `$XDG_CACHE_HOME/stagehand` or `~/.cache/stagehand`
    /// - macOS: `~/Library/Caches/stagehand`
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Get the config directory path
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Root of the filesystem dependency cache
    #[must_use]
    pub fn dependency_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(DEPENDENCY_CACHE_SUBDIR)
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &str) -> PathBuf {
        if let Ok(path) = env::var(var) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        platform()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                // Fallback to home directory
                dirs::home_dir()
                    .map(|h| h.join(home_fallback).join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(home_fallback).join(APP_NAME))
            })
    }
}

impl Default for StagehandDirs {
    fn default() -> Self {
        Self::new()
    }
}
