//! Core business logic module
//!
//! # Submodules
//!
//! - [`declaration`] - Resolved dependency declarations
//! - [`fingerprint`] - Recipe computation
//! - [`bundle`] - Compiled dependency bundles and binaries
//! - [`cache`] - Dependency cache over a pluggable store
//! - [`build_env`] - Environment handed to toolchain commands
//! - [`executor`] - Compile stage
//! - [`packager`] - Runtime closure packaging
//! - [`pipeline`] - Build orchestration
//! - [`lock`] - Cargo lock file handling
//! - [`manifest`] - Project discovery
//! - [`resolver`] - Dependency resolution
//! - [`settings`] - Configuration file

pub mod build_env;
pub mod bundle;
pub mod cache;
pub mod declaration;
pub mod executor;
pub mod fingerprint;
pub mod lock;
pub mod manifest;
pub mod packager;
pub mod pipeline;
pub mod resolver;
pub mod settings;
