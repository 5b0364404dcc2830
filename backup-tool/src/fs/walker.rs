//! Directory traversal without following symlinks.
//!
//! Entries come back sorted by their `/`-joined relative path, so hashing
//! and verification see files in the same order on every run.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::metadata::NodeKind;

/// A node discovered during walking
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Full path to the node
    pub path: PathBuf,

    /// Relative path from the root, `/` separated
    pub relative_path: String,

    pub kind: NodeKind,
}

impl TreeEntry {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = relative_string(&path, root);

        Ok(Self {
            kind: NodeKind::of(&metadata.file_type()),
            path,
            relative_path,
        })
    }
}

/// `/`-joined path of `path` below `root`. Non-UTF-8 components are
/// converted lossily.
pub fn relative_string(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk every node below `root` (the root itself excluded).
///
/// # Returns
/// * `Ok(Vec<TreeEntry>)` - All nodes, sorted by relative path
/// * `Err(io::Error)` - If a directory cannot be read
pub fn walk_tree(root: &Path) -> std::io::Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry?;
        entries.push(TreeEntry::from_entry(&entry, root)?);
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

/// Regular files below `root`, sorted by relative path. Symlinks and special
/// files are left out.
pub fn regular_files(root: &Path) -> std::io::Result<Vec<TreeEntry>> {
    Ok(walk_tree(root)?
        .into_iter()
        .filter(|e| e.kind == NodeKind::File)
        .collect())
}

/// Count every node below `root` (fast, without collecting)
pub fn count_entries(root: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        entry?;
        count += 1;
    }
    Ok(count)
}
