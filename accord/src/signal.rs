//! Restore signal file.
//!
//! A zero-byte `restore` marker in the backup directory. A completed backup
//! creates it; a restore requires it and removes it when done. It is not a
//! lock: two runs against the same directory are not serialized.

use crate::utils::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const SIGNAL_FILE_NAME: &str = "restore";

#[derive(Debug, Clone)]
pub struct SignalFile {
    path: PathBuf,
}

impl SignalFile {
    pub fn new(backup_directory: &Path) -> Self {
        Self {
            path: backup_directory.join(SIGNAL_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    /// Create the marker. Leaves an existing marker untouched.
    pub fn raise(&self) -> Result<()> {
        OpenOptions::new().create(true).append(true).open(&self.path)?;
        tracing::info!(path = %self.path.display(), "Restore signal written");
        Ok(())
    }

    /// Remove the marker if present.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Restore signal cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
