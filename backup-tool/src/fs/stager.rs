//! Copies every source entry into the staging tree.
//!
//! Entries are processed one at a time in sources-file order. The first
//! failure aborts staging; the caller's workspace guard removes the partial
//! tree.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::metadata::{FileMetadata, NodeKind};
use crate::progress::{Operation, ProgressUpdate};
use crate::signal::CancelHandle;
use crate::sources::{EntryKind, SourceEntry, SourcesFile};
use crate::utils::errors::{BackupError, Result};

/// A populated staging directory
#[derive(Debug, Clone)]
pub struct StagingTree {
    pub root: PathBuf,

    /// Labels in the order they were staged
    pub labels: Vec<String>,
}

/// Copy all entries of `sources` into `dest`, one subtree per label.
pub fn stage<F>(
    sources: &SourcesFile,
    dest: &Path,
    cancel: &CancelHandle,
    mut on_progress: F,
) -> Result<StagingTree>
where
    F: FnMut(&ProgressUpdate),
{
    fs::create_dir_all(dest)?;

    let total = sources.len();
    let mut labels = Vec::with_capacity(total);

    for (idx, entry) in sources.iter().enumerate() {
        cancel.check()?;

        let started = Instant::now();
        copy_entry(entry, dest, cancel)?;
        let elapsed = started.elapsed();

        info!("Staged '{}' in {:.2}s", entry.label, elapsed.as_secs_f64());
        labels.push(entry.label.clone());

        on_progress(&ProgressUpdate {
            operation: Operation::Copying,
            current: idx + 1,
            total,
            name: entry.label.clone(),
            elapsed: Some(elapsed),
        });
    }

    Ok(StagingTree {
        root: dest.to_path_buf(),
        labels,
    })
}

fn copy_entry(entry: &SourceEntry, dest: &Path, cancel: &CancelHandle) -> Result<()> {
    // The entry path itself is followed; links below it are not.
    let source_meta = fs::metadata(&entry.path).map_err(|e| BackupError::copy(&entry.label, e))?;
    let label_dir = dest.join(&entry.label);

    if source_meta.is_dir() {
        if entry.kind == EntryKind::File {
            warn!(
                "'{}' points to a directory but has no trailing separator; copying it as a directory",
                entry.label
            );
        }
        copy_dir(&entry.path, &label_dir, cancel).map_err(|e| match e {
            BackupError::Io(io) => BackupError::copy(&entry.label, io),
            other => other,
        })
    } else if source_meta.is_file() {
        copy_file(&entry.path, &label_dir, &source_meta)
            .map_err(|e| BackupError::copy(&entry.label, e))
    } else {
        Err(BackupError::copy(
            &entry.label,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is neither a file nor a directory", entry.path.display()),
            ),
        ))
    }
}

/// `<label_dir>/<basename>`
fn copy_file(src: &Path, label_dir: &Path, source_meta: &fs::Metadata) -> std::io::Result<()> {
    fs::create_dir(label_dir)?;
    let name = src.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "source file has no name")
    })?;
    let target = label_dir.join(name);

    fs::copy(src, &target)?;
    FileMetadata::from_metadata(source_meta).apply_to_path(&target)?;
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path, cancel: &CancelHandle) -> Result<()> {
    fs::create_dir(dst)?;

    // Directory times are restored last, deepest first
    let mut directories: Vec<(PathBuf, FileMetadata)> =
        vec![(dst.to_path_buf(), FileMetadata::from_metadata(&fs::metadata(src)?))];

    let walker = WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();

    for entry in walker {
        cancel.check()?;

        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let meta = FileMetadata::from_path(entry.path())?;

        match meta.kind {
            NodeKind::Directory => {
                fs::create_dir(&target)?;
                directories.push((target, meta));
            }
            NodeKind::File => {
                fs::copy(entry.path(), &target)?;
                meta.apply_to_path(&target)?;
            }
            NodeKind::Symlink => {
                if !entry.path().exists() {
                    debug!("Skipping dangling symlink {}", entry.path().display());
                    continue;
                }
                symlink(fs::read_link(entry.path())?, &target)?;
                meta.apply_to_path(&target)?;
            }
            NodeKind::Special => {
                debug!("Skipping special file {}", entry.path().display());
            }
        }
    }

    for (path, meta) in directories.iter().rev() {
        meta.apply_to_path(path)?;
    }

    Ok(())
}
