//! Local filesystem operations: walking, archiving and moving files.

pub mod archive;
pub mod walker;

use crate::utils::{AccordError, Result};
use std::path::Path;

/// Move `from` to `to`, falling back to copy-and-delete across
/// filesystems. A missing source is a [`AccordError::MissingInput`].
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        return Err(AccordError::MissingInput(from.to_path_buf()));
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    tracing::debug!(from = %from.display(), to = %to.display(), "Moved file");
    Ok(())
}

/// Delete a file if it exists.
pub fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete a directory tree if it exists.
pub fn remove_tree_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
