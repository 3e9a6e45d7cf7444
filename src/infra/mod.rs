//! Infrastructure layer
//!
//! Handles I/O: cache backends, the filesystem, and toolchain processes.

pub mod dirs;
pub mod filesystem;
pub mod store;
pub mod toolchain;
