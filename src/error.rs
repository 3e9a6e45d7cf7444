//! Error types for stagehand
//!
//! Domain-specific error types using thiserror.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::pipeline::Stage;

/// Fingerprinting errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// Declaration carries a range or placeholder instead of an exact version
    #[error("Dependency '{name}' is not fully resolved: '{version}' is not an exact version")]
    UnresolvedDependency { name: String, version: String },

    /// Declaration without a name
    #[error("Dependency declaration has an empty name")]
    EmptyName,

    /// Target platform identifier is empty
    #[error("Target platform identifier must not be empty")]
    EmptyPlatform,
}

/// Dependency resolution errors
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// Project manifest is missing
    #[error("Project manifest not found at '{path}'")]
    ManifestNotFound { path: PathBuf },

    /// Lock file is missing
    #[error("Lock file not found at '{path}'. Generate it before building.")]
    LockfileNotFound { path: PathBuf },

    /// Manifest or lock file is not valid TOML
    #[error("Failed to parse '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Lock file format newer than we understand
    #[error("Unsupported lock file version {version} in '{path}'")]
    UnsupportedLockVersion { path: PathBuf, version: u32 },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Backing store errors
///
/// A missing entry is not an error; stores report it as `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend cannot be reached
    #[error("Cache backend '{backend}' is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    /// Entry exists but cannot be decoded
    #[error("Cache entry '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// Backend cannot be set up from its configuration
    #[error("Cache backend '{backend}' is misconfigured: {reason}")]
    Config { backend: String, reason: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Compiled dependency bundle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    /// Artifact key would resolve outside the bundle directory
    #[error("Invalid artifact path '{path}': must be relative and stay inside the bundle")]
    InvalidArtifactPath { path: String },
}

/// Dependency cache errors
///
/// None of these are fatal to a build; they degrade to a cache miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backing store unreachable or failing
    #[error("Cache unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },

    /// Backing store did not answer in time
    #[error("Cache {operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// Stored entry could not be decoded
    #[error("Cache entry for recipe {recipe} is corrupt: {reason}")]
    Corrupt { recipe: String, reason: String },
}

impl CacheError {
    /// Convert a store error observed during `operation`
    pub fn from_store(operation: &str, error: StoreError) -> Self {
        match error {
            StoreError::Corrupt { key, reason } => Self::Corrupt {
                recipe: key,
                reason,
            },
            other => Self::Unavailable {
                operation: operation.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Which compilation a toolchain failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    /// External dependencies
    Dependencies,
    /// The project's own source
    Project,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependencies => write!(f, "dependency"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Toolchain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    /// Compiler exited unsuccessfully
    #[error(
        "{stage} compilation failed (exit status {}):\n{diagnostics}",
        .status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
    )]
    CompilationFailed {
        stage: CompileStage,
        status: Option<i32>,
        diagnostics: String,
    },

    /// Toolchain program not found
    #[error("Toolchain program not found: {program}")]
    NotFound { program: String },

    /// Toolchain process could not be started
    #[error("Failed to run '{program}': {error}")]
    Spawn { program: String, error: String },

    /// Toolchain ran but did not produce what it must
    #[error("Toolchain produced invalid output: {message}")]
    InvalidOutput { message: String },
}

/// Packaging errors
#[derive(Error, Debug)]
pub enum PackageError {
    /// Binary has no content
    #[error("Binary '{name}' is empty")]
    EmptyBinary { name: String },

    /// Binary name is not a plain file name
    #[error("Invalid binary name '{name}'")]
    InvalidBinaryName { name: String },

    /// Runtime requirement looks like intermediate build state
    #[error("Refusing to package build artifact '{path}': {reason}")]
    BuildArtifact { path: PathBuf, reason: String },

    /// Destination escapes the output root
    #[error("Invalid destination '{path}': must be relative and stay inside the output")]
    InvalidDestination { path: PathBuf },

    /// Two closure entries share a destination
    #[error("Duplicate destination '{path}' in runtime closure")]
    DuplicateEntry { path: PathBuf },

    /// Runtime requirement source is missing
    #[error("Runtime requirement not found: {path}")]
    MissingRequirement { path: PathBuf },

    /// Output directory already has content
    #[error("Output directory is not empty: {path}. Enable overwrite to replace it")]
    OutputNotEmpty { path: PathBuf },

    /// File present in output but absent from the closure
    #[error("Unexpected file in build output: {path}")]
    UnexpectedFile { path: PathBuf },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Settings errors
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Required setting is absent
    #[error("Missing required setting '{field}'")]
    MissingField { field: String },

    /// Configured cache backend cannot be constructed
    #[error("Cannot set up cache backend: {0}")]
    Backend(#[from] StoreError),
}

/// Top-level build error type
#[derive(Error, Debug)]
pub enum BuildError {
    /// Resolution error
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Fingerprint error
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    /// Toolchain error
    #[error("Toolchain failure: {0}")]
    Toolchain(#[from] ToolchainError),

    /// Package error
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// Settings error
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Cache error surfaced while assembling a pipeline
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Build was cancelled
    #[error("Build cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// Cache handle opened for a different toolchain
    #[error("Cache was opened for toolchain '{cache}' but the toolchain reports '{toolchain}'")]
    ToolchainMismatch { cache: String, toolchain: String },
}
