//! Toolchain management
//!
//! The [`Toolchain`] trait is the seam to the external compiler.
//! [`CommandToolchain`] implements it by running configured commands with
//! the environment described in [`crate::core::build_env`].

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::core::build_env::BuildEnvironment;
use crate::core::bundle::{Binary, BuildMetadata, CompiledDependencyBundle};
use crate::core::declaration::DeclarationSet;
use crate::core::fingerprint::{update_field, TargetPlatform, ToolchainVersion};
use crate::core::manifest::ProjectSource;
use crate::error::{CompileStage, ToolchainError};

/// External compiler used by the build executor
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Identity of this toolchain; part of every recipe
    fn version(&self) -> &ToolchainVersion;

    /// Compile exactly the given dependencies, without any project source
    async fn compile_dependencies(
        &self,
        declarations: &DeclarationSet,
        platform: &TargetPlatform,
    ) -> Result<CompiledDependencyBundle, ToolchainError>;

    /// Compile the project's own source against a dependency bundle
    async fn compile_project(
        &self,
        source: &ProjectSource,
        bundle: &CompiledDependencyBundle,
    ) -> Result<Binary, ToolchainError>;
}

/// Scratch directory removed when dropped
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(parent: &Path, label: &str) -> Result<Self, ToolchainError> {
        let path = parent.join(format!("{label}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| ToolchainError::Spawn {
            program: "stagehand".to_string(),
            error: format!("cannot create scratch directory {}: {e}", path.display()),
        })?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            tracing::debug!("Could not remove scratch directory {}: {}", self.0.display(), e);
        }
    }
}

/// Tag mixed into the dependency command digest
const COMMAND_FORMAT: &str = "stagehand-deps-command/v1";

/// Variables the dependency command inherits from the calling process
const INHERITED_ENV: &[&str] = &[
    "PATH", "HOME", "TMPDIR", "TMP", "TEMP", "USER", "LANG", "SystemRoot",
];

/// Toolchain driven by external commands
///
/// The dependency command runs in an empty scratch directory and must fill
/// `STAGEHAND_DEPS_DIR`. The project command runs in the source root and
/// must write the binary to `STAGEHAND_OUT`.
///
/// Everything that can change dependency artifacts is part of
/// [`Toolchain::version`]: the configured version, the dependency command
/// line and the extra environment. The dependency command only sees
/// [`INHERITED_ENV`] from the calling process, so no other ambient variable
/// can change its output behind the recipe's back.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    base_version: ToolchainVersion,
    version: ToolchainVersion,
    platform: TargetPlatform,
    dependencies_command: Vec<String>,
    project_command: Vec<String>,
    binary_name: String,
    work_dir: PathBuf,
    jobs: Option<usize>,
    env: BTreeMap<String, String>,
}

impl CommandToolchain {
    /// Create a command toolchain
    ///
    /// Both command programs must be resolvable on `PATH` (or be paths to
    /// existing executables).
    pub fn new(
        version: ToolchainVersion,
        platform: TargetPlatform,
        dependencies_command: Vec<String>,
        project_command: Vec<String>,
        binary_name: &str,
        work_dir: PathBuf,
    ) -> Result<Self, ToolchainError> {
        locate(&dependencies_command)?;
        locate(&project_command)?;
        let env = BTreeMap::new();
        Ok(Self {
            version: effective_version(&version, &dependencies_command, &env),
            base_version: version,
            platform,
            dependencies_command,
            project_command,
            binary_name: binary_name.to_string(),
            work_dir,
            jobs: None,
            env,
        })
    }

    /// Override the number of parallel jobs
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Extra environment passed to both commands
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.version = effective_version(&self.base_version, &self.dependencies_command, &env);
        self.env = env;
        self
    }

    /// Identify a toolchain by the first line a version command prints
    pub async fn detect_version(command: &[String]) -> Result<ToolchainVersion, ToolchainError> {
        let program = locate(command)?;
        let output = tokio::process::Command::new(&program)
            .args(&command[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&command[0], &e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or_default().trim();
        if !output.status.success() || line.is_empty() {
            return Err(ToolchainError::InvalidOutput {
                message: format!("'{}' did not report a version", command.join(" ")),
            });
        }
        Ok(ToolchainVersion::new(line))
    }

    fn environment(&self, env: BuildEnvironment) -> BuildEnvironment {
        let env = env.with_envs(&self.env);
        match self.jobs {
            Some(jobs) => env.with_jobs(jobs),
            None => env,
        }
    }

    async fn run(
        &self,
        stage: CompileStage,
        command: &[String],
        cwd: &Path,
        env: &BuildEnvironment,
    ) -> Result<(), ToolchainError> {
        env.validate().map_err(|e| ToolchainError::Spawn {
            program: command.join(" "),
            error: e.to_string(),
        })?;
        let program = locate(command)?;

        tracing::debug!("Running {} command: {}", stage, command.join(" "));
        let mut cmd = tokio::process::Command::new(&program);
        if stage == CompileStage::Dependencies {
            cmd.env_clear();
            for name in INHERITED_ENV {
                if let Some(value) = std::env::var_os(name) {
                    cmd.env(name, value);
                }
            }
        }
        let output = cmd
            .args(&command[1..])
            .current_dir(cwd)
            .envs(env.to_env_map())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&command[0], &e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostics = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        Err(ToolchainError::CompilationFailed {
            stage,
            status: output.status.code(),
            diagnostics,
        })
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    fn version(&self) -> &ToolchainVersion {
        &self.version
    }

    async fn compile_dependencies(
        &self,
        declarations: &DeclarationSet,
        platform: &TargetPlatform,
    ) -> Result<CompiledDependencyBundle, ToolchainError> {
        let scratch = ScratchDir::create(&self.work_dir, "deps")?;
        let deps_dir = scratch.path().join("out");
        let manifest = scratch.path().join("dependencies.json");

        let listing = serde_json::to_vec_pretty(&declarations.canonical()).map_err(|e| {
            ToolchainError::InvalidOutput {
                message: e.to_string(),
            }
        })?;
        let prepare = async {
            tokio::fs::create_dir_all(&deps_dir).await?;
            tokio::fs::write(&manifest, listing).await?;
            Ok::<_, std::io::Error>(())
        };
        prepare.await.map_err(|e| ToolchainError::Spawn {
            program: self.dependencies_command.join(" "),
            error: e.to_string(),
        })?;

        let env = self.environment(BuildEnvironment::for_dependencies(
            platform.as_str(),
            deps_dir.clone(),
            manifest,
        ));
        self.run(
            CompileStage::Dependencies,
            &self.dependencies_command,
            scratch.path(),
            &env,
        )
        .await?;

        let bundle = CompiledDependencyBundle::from_dir(&deps_dir).map_err(|e| {
            ToolchainError::InvalidOutput {
                message: format!("cannot collect {}: {e}", deps_dir.display()),
            }
        })?;
        tracing::info!(
            "Compiled {} dependencies into {} artifacts",
            declarations.len(),
            bundle.len()
        );
        Ok(bundle.with_metadata(BuildMetadata::now()))
    }

    async fn compile_project(
        &self,
        source: &ProjectSource,
        bundle: &CompiledDependencyBundle,
    ) -> Result<Binary, ToolchainError> {
        let scratch = ScratchDir::create(&self.work_dir, "project")?;
        let deps_dir = scratch.path().join("deps");
        let out = scratch.path().join("out").join(&self.binary_name);

        bundle
            .write_to_dir(&deps_dir)
            .and_then(|()| std::fs::create_dir_all(scratch.path().join("out")))
            .map_err(|e| ToolchainError::Spawn {
                program: self.project_command.join(" "),
                error: format!("cannot prepare dependency bundle: {e}"),
            })?;

        let env = self.environment(BuildEnvironment::for_project(
            self.platform.as_str(),
            source.root().to_path_buf(),
            deps_dir,
            out.clone(),
        ));
        self.run(CompileStage::Project, &self.project_command, source.root(), &env)
            .await?;

        let contents = tokio::fs::read(&out)
            .await
            .map_err(|e| ToolchainError::InvalidOutput {
                message: format!("project command did not write {}: {e}", out.display()),
            })?;
        Ok(Binary::new(&self.binary_name, contents).with_metadata(BuildMetadata::now()))
    }
}

/// Configured version plus a digest of the dependency command and extra env
fn effective_version(
    base: &ToolchainVersion,
    command: &[String],
    env: &BTreeMap<String, String>,
) -> ToolchainVersion {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, COMMAND_FORMAT);
    hasher.update((command.len() as u64).to_le_bytes());
    for arg in command {
        update_field(&mut hasher, arg);
    }
    hasher.update((env.len() as u64).to_le_bytes());
    for (name, value) in env {
        update_field(&mut hasher, name);
        update_field(&mut hasher, value);
    }
    let digest = hex::encode(hasher.finalize());
    ToolchainVersion::new(format!("{base} (deps {})", &digest[..12]))
}

fn locate(command: &[String]) -> Result<PathBuf, ToolchainError> {
    let program = command.first().ok_or_else(|| ToolchainError::NotFound {
        program: "<empty command>".to_string(),
    })?;
    which::which(program).map_err(|_| ToolchainError::NotFound {
        program: program.clone(),
    })
}

fn spawn_error(program: &str, error: &std::io::Error) -> ToolchainError {
    if error.kind() == std::io::ErrorKind::NotFound {
        ToolchainError::NotFound {
            program: program.to_string(),
        }
    } else {
        ToolchainError::Spawn {
            program: program.to_string(),
            error: error.to_string(),
        }
    }
}
