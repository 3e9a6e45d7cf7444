//! Filesystem operations
//!
//! Handles file and directory operations for the packager.

use std::path::Path;

use crate::error::PackageError;

fn io_error(path: &Path, error: &std::io::Error) -> PackageError {
    PackageError::Io {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), PackageError> {
    std::fs::create_dir_all(path).map_err(|e| io_error(path, &e))
}

/// Remove everything inside a directory, keeping the directory itself
pub fn clear_dir(path: &Path) -> Result<(), PackageError> {
    if !path.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(path).map_err(|e| io_error(path, &e))? {
        let entry = entry.map_err(|e| io_error(path, &e))?;
        let child = entry.path();
        let file_type = entry.file_type().map_err(|e| io_error(&child, &e))?;
        if file_type.is_dir() {
            std::fs::remove_dir_all(&child).map_err(|e| io_error(&child, &e))?;
        } else {
            std::fs::remove_file(&child).map_err(|e| io_error(&child, &e))?;
        }
    }
    Ok(())
}

/// Whether `path` is missing or an empty directory
pub fn is_empty_dir(path: &Path) -> Result<bool, PackageError> {
    if !path.exists() {
        return Ok(true);
    }
    let mut entries = std::fs::read_dir(path).map_err(|e| io_error(path, &e))?;
    Ok(entries.next().is_none())
}

/// Write bytes to a file, creating parent directories
pub fn write_file(path: &Path, content: &[u8]) -> Result<(), PackageError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| io_error(path, &e))
}

/// Read a whole file
pub fn read_file(path: &Path) -> Result<Vec<u8>, PackageError> {
    std::fs::read(path).map_err(|e| io_error(path, &e))
}

/// Mark a file executable (no-op off Unix)
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<(), PackageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| io_error(path, &e))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<(), PackageError> {
    Ok(())
}
