//! Temporary paths owned by one run.
//!
//! Temporaries are registered before they are created, final outputs only
//! once this run has created them. [`RunWorkspace::cleanup`]
//! removes whatever still exists and may run any number of times; `Drop`
//! runs it once more, so a panic or early return cannot leak temporaries.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct RunWorkspace {
    paths: Vec<PathBuf>,
}

impl RunWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `path` for removal and hand it back.
    pub fn register(&mut self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path.clone());
        }
        path
    }

    /// Stop tracking `path`; it survives cleanup.
    pub fn release(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Remove `path` now and stop tracking it.
    pub fn discard(&mut self, path: &Path) -> std::io::Result<()> {
        remove_path(path)?;
        self.release(path);
        Ok(())
    }

    /// Remove every tracked path, newest first. Missing paths are fine.
    pub fn cleanup(&mut self) -> std::io::Result<()> {
        let mut first_error = None;

        for path in self.paths.iter().rev() {
            if let Err(e) = remove_path(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    debug!("Removing {}", path.display());

    let result = if meta.is_dir() {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                // Staged copies keep read-only directory modes
                make_writable(path);
                fs::remove_dir_all(path)
            }
            other => other,
        }
    } else {
        fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn make_writable(root: &Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_dir() {
            if let Ok(meta) = entry.metadata() {
                let mode = meta.permissions().mode() | 0o700;
                let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode));
            }
        }
    }
}
