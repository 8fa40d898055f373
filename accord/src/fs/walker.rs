//! Directory traversal with subtree exclusion.
//!
//! Used to decide what goes into an archive. Excluded subtrees are pruned
//! before they are descended into, so excluding the live database or the
//! repository object store costs nothing.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Subtrees to skip, relative to the walk root (e.g. `pgdata`,
    /// `object/anaconda-repository`)
    pub exclude: Vec<PathBuf>,
}

impl WalkOptions {
    pub fn excluding<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            follow_links: false,
            exclude: paths.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// An entry discovered during walking
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub kind: EntryKind,

    /// File size in bytes (0 for directories)
    pub size: u64,
}

impl TreeEntry {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type();

        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };

        Ok(Self {
            path,
            relative_path,
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
        })
    }
}

/// Walk a directory tree and collect every entry below `root`, parents
/// before children. The root itself is not returned.
///
/// # Example
/// ```no_run
/// use accord::fs::walker::{walk_tree, WalkOptions};
/// use std::path::Path;
///
/// let entries = walk_tree(Path::new("/opt/anaconda/storage"), &WalkOptions::excluding(["pgdata"])).unwrap();
/// println!("Found {} entries", entries.len());
/// ```
pub fn walk_tree(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, root, &options.exclude));

    for entry in walker {
        let entry = entry?;
        entries.push(TreeEntry::from_entry(&entry, root)?);
    }

    Ok(entries)
}

fn is_excluded(entry: &DirEntry, root: &Path, exclude: &[PathBuf]) -> bool {
    match entry.path().strip_prefix(root) {
        Ok(relative) => exclude.iter().any(|skip| relative == skip.as_path()),
        Err(_) => false,
    }
}
