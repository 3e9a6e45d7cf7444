//! Default configuration values

/// Config file looked up in the project root
pub const CONFIG_FILE_NAME: &str = "stagehand.toml";

/// Upper bound for a single cache store call (in milliseconds)
pub const CACHE_TIMEOUT_MS: u64 = 5_000;

/// How long a build waits for a concurrent build of the same recipe
pub const LEASE_TIMEOUT_MS: u64 = 30 * 60 * 1000; // 30 minutes

/// Where the packager places the binary inside the output
pub const DEFAULT_BINARY_DIR: &str = "usr/local/bin";

/// Output directory relative to the project root
pub const DEFAULT_OUTPUT_DIR: &str = "dist";

/// Scratch directory for toolchain invocations, relative to the project root
pub const DEFAULT_WORK_DIR: &str = "target/stagehand";

/// Trust roots most runtime images need for outbound TLS
pub const DEFAULT_TRUST_ROOTS: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Command used to identify the toolchain when no version is configured
pub const DEFAULT_VERSION_COMMAND: &[&str] = &["rustc", "--version"];
