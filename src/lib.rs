//! Stagehand - dependency-cache-aware build orchestrator
//!
//! This library builds a project in stages: it fingerprints the project's
//! resolved dependencies, reuses a cached dependency build when the
//! fingerprint is known, compiles only the project's own source on top, and
//! packages the binary with its minimal runtime closure.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`core`] - Fingerprinting, caching, execution, packaging and the pipeline
//! - [`infra`] - Infrastructure layer (cache stores, filesystem, toolchain processes)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod logging;

#[cfg(test)]
pub mod test_utils;

pub use crate::core::pipeline::{BuildReport, CacheStatus, Pipeline, Stage};
pub use crate::error::BuildError;
