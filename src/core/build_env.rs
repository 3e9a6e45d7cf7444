//! Build environment setup
//!
//! Provides the environment handed to toolchain commands. Sets variables
//! like `STAGEHAND_TARGET`, `STAGEHAND_JOBS`, `STAGEHAND_DEPS_DIR`.
//!
//! The dependency stage deliberately gets no `STAGEHAND_SOURCE_DIR`: a
//! dependency build that needed project source would make the recipe an
//! incomplete cache key.

use std::collections::BTreeMap;
use std::path::PathBuf;

pub const ENV_TARGET: &str = "STAGEHAND_TARGET";
pub const ENV_JOBS: &str = "STAGEHAND_JOBS";
pub const ENV_DEPS_DIR: &str = "STAGEHAND_DEPS_DIR";
pub const ENV_DEPS_MANIFEST: &str = "STAGEHAND_DEPS_MANIFEST";
pub const ENV_SOURCE_DIR: &str = "STAGEHAND_SOURCE_DIR";
pub const ENV_OUT: &str = "STAGEHAND_OUT";

/// Environment for one toolchain invocation
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEnvironment {
    /// Target platform identifier
    pub target: String,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Dependency artifacts: filled by the dependency stage, read by the project stage
    pub deps_dir: PathBuf,
    /// JSON list of dependencies to compile (dependency stage only)
    pub deps_manifest: Option<PathBuf>,
    /// Project source root (project stage only)
    pub source_dir: Option<PathBuf>,
    /// Where the binary must be written (project stage only)
    pub out: Option<PathBuf>,
    /// Additional environment variables
    pub extra_env: BTreeMap<String, String>,
}

impl BuildEnvironment {
    /// Environment for compiling dependencies in isolation
    pub fn for_dependencies(target: &str, deps_dir: PathBuf, deps_manifest: PathBuf) -> Self {
        Self {
            target: target.to_string(),
            jobs: num_cpus::get(),
            deps_dir,
            deps_manifest: Some(deps_manifest),
            source_dir: None,
            out: None,
            extra_env: BTreeMap::new(),
        }
    }

    /// Environment for compiling the project against a dependency bundle
    pub fn for_project(target: &str, source_dir: PathBuf, deps_dir: PathBuf, out: PathBuf) -> Self {
        Self {
            target: target.to_string(),
            jobs: num_cpus::get(),
            deps_dir,
            deps_manifest: None,
            source_dir: Some(source_dir),
            out: Some(out),
            extra_env: BTreeMap::new(),
        }
    }

    /// Set the number of parallel jobs
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Add an extra environment variable
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.insert(key.to_string(), value.to_string());
        self
    }

    /// Add several extra environment variables
    #[must_use]
    pub fn with_envs<'a>(
        mut self,
        vars: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        for (key, value) in vars {
            self.extra_env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Convert to environment variable map for process execution
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        env.insert(ENV_TARGET.to_string(), self.target.clone());
        env.insert(ENV_JOBS.to_string(), self.jobs.to_string());
        env.insert(ENV_DEPS_DIR.to_string(), self.deps_dir.display().to_string());

        if let Some(ref manifest) = self.deps_manifest {
            env.insert(ENV_DEPS_MANIFEST.to_string(), manifest.display().to_string());
        }
        if let Some(ref source) = self.source_dir {
            env.insert(ENV_SOURCE_DIR.to_string(), source.display().to_string());
        }
        if let Some(ref out) = self.out {
            env.insert(ENV_OUT.to_string(), out.display().to_string());
        }

        // Extra variables never shadow the contract above
        for (key, value) in &self.extra_env {
            env.entry(key.clone()).or_insert_with(|| value.clone());
        }

        env
    }

    /// Check if all required environment variables are set
    pub fn validate(&self) -> Result<(), BuildEnvError> {
        if self.target.is_empty() {
            return Err(BuildEnvError::MissingVariable(ENV_TARGET.to_string()));
        }
        if self.jobs == 0 {
            return Err(BuildEnvError::InvalidValue {
                variable: ENV_JOBS.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.source_dir.is_some() && self.out.is_none() {
            return Err(BuildEnvError::MissingVariable(ENV_OUT.to_string()));
        }
        Ok(())
    }
}

/// Build environment errors
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEnvError {
    /// Required variable is missing
    MissingVariable(String),
    /// Variable has invalid value
    InvalidValue { variable: String, reason: String },
}

impl std::fmt::Display for BuildEnvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingVariable(var) => write!(f, "Missing required environment variable: {var}"),
            Self::InvalidValue { variable, reason } => {
                write!(f, "Invalid value for {variable}: {reason}")
            }
        }
    }
}

impl std::error::Error for BuildEnvError {}
