//! Gzip-compressed tar archives.
//!
//! Archives are rooted at a named directory (`storage/...`,
//! `anaconda_backup/...`) so they extract in place relative to a parent.

use super::walker::{walk_tree, EntryKind, WalkOptions};
use crate::utils::{AccordError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::info;

/// Pack `source` into `destination`, storing every entry under `arc_root`.
/// Returns the number of entries written below the root.
pub fn create(source: &Path, arc_root: &str, destination: &Path, options: &WalkOptions) -> Result<usize> {
    let entries = walk_tree(source, options)?;

    let file = File::create(destination)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    builder.append_dir(arc_root, source)?;
    for entry in &entries {
        if entry.path == destination {
            continue;
        }
        let name = Path::new(arc_root).join(&entry.relative_path);
        match entry.kind {
            EntryKind::Dir => builder.append_dir(&name, &entry.path)?,
            EntryKind::File | EntryKind::Symlink => builder.append_path_with_name(&entry.path, &name)?,
        }
    }

    let encoder = builder.into_inner()?;
    let writer = encoder.finish()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    info!(
        archive = %destination.display(),
        source = %source.display(),
        entries = entries.len(),
        bytes = entries.iter().map(|e| e.size).sum::<u64>(),
        "Archive written"
    );
    Ok(entries.len())
}

fn invalid(path: &Path, reason: impl ToString) -> AccordError {
    AccordError::InvalidArchive {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Read `path` end to end as a gzip tar stream. Returns the entry count.
/// Anything unreadable, or an archive with no entries, is invalid.
pub fn verify(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(|e| invalid(path, e))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut count = 0usize;
    for entry in archive.entries().map_err(|e| invalid(path, e))? {
        let mut entry = entry.map_err(|e| invalid(path, e))?;
        std::io::copy(&mut entry, &mut std::io::sink()).map_err(|e| invalid(path, e))?;
        count += 1;
    }

    if count == 0 {
        return Err(invalid(path, "archive has no entries"));
    }
    Ok(count)
}

/// Validate and unpack `path` into `destination`, overwriting existing files.
pub fn extract(path: &Path, destination: &Path) -> Result<()> {
    verify(path)?;

    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(true);
    archive.set_overwrite(true);
    archive.unpack(destination).map_err(|e| invalid(path, e))?;

    info!(archive = %path.display(), destination = %destination.display(), "Archive extracted");
    Ok(())
}

/// Run [`create`] on the blocking pool.
pub async fn create_blocking(
    source: PathBuf,
    arc_root: String,
    destination: PathBuf,
    options: WalkOptions,
) -> Result<usize> {
    tokio::task::spawn_blocking(move || create(&source, &arc_root, &destination, &options))
        .await
        .map_err(|e| AccordError::Io(std::io::Error::other(e)))?
}

/// Run [`extract`] on the blocking pool.
pub async fn extract_blocking(path: PathBuf, destination: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || extract(&path, &destination))
        .await
        .map_err(|e| AccordError::Io(std::io::Error::other(e)))?
}
