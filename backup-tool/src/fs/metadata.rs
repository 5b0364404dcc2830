//! File metadata handling for staging copies.
//!
//! Metadata is read without following symlinks and re-applied to the copy:
//! permission bits for files and directories, access/modification times for
//! everything (links included, via `lutimes`).

use nix::sys::stat::{lutimes, utimes};
use nix::sys::time::TimeVal;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// What a directory entry is, as seen without following links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,

    /// Sockets, FIFOs, block and character devices
    Special,
}

impl NodeKind {
    pub fn of(file_type: &fs::FileType) -> Self {
        if file_type.is_symlink() {
            NodeKind::Symlink
        } else if file_type.is_dir() {
            NodeKind::Directory
        } else if file_type.is_file() {
            NodeKind::File
        } else {
            NodeKind::Special
        }
    }
}

/// Metadata carried from a source node to its copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub kind: NodeKind,

    /// Unix mode bits
    pub permissions: u32,

    /// (seconds, nanoseconds) since the Unix epoch
    pub accessed: (i64, i64),
    pub modified: (i64, i64),
}

impl FileMetadata {
    /// Extract metadata from a path, not following a final symlink
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_metadata(&fs::symlink_metadata(path)?))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            kind: NodeKind::of(&metadata.file_type()),
            permissions: metadata.permissions().mode(),
            accessed: (metadata.atime(), metadata.atime_nsec()),
            modified: (metadata.mtime(), metadata.mtime_nsec()),
        }
    }

    /// Apply permissions and timestamps to `path`.
    ///
    /// Directories must get this after their contents are written, or the
    /// writes bump the modification time again.
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        let atime = to_timeval(self.accessed);
        let mtime = to_timeval(self.modified);

        match self.kind {
            NodeKind::Symlink => {
                lutimes(path, &atime, &mtime).map_err(std::io::Error::from)?;
            }
            _ => {
                fs::set_permissions(path, fs::Permissions::from_mode(self.permissions & 0o7777))?;
                utimes(path, &atime, &mtime).map_err(std::io::Error::from)?;
            }
        }

        Ok(())
    }
}

fn to_timeval((secs, nanos): (i64, i64)) -> TimeVal {
    TimeVal::new(secs as _, (nanos / 1_000) as _)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.kind, NodeKind::File);
        assert!(metadata.modified.0 > 0);

        Ok(())
    }

    #[test]
    fn test_permissions_and_mtime_preserved() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"a")?;
        fs::write(&dst, b"a")?;
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640))?;
        utimes(&src, &TimeVal::new(1_000_000, 0), &TimeVal::new(2_000_000, 0))
            .map_err(std::io::Error::from)?;

        FileMetadata::from_path(&src)?.apply_to_path(&dst)?;

        let copied = FileMetadata::from_path(&dst)?;
        assert_eq!(copied.permissions & 0o777, 0o640);
        assert_eq!(copied.modified.0, 2_000_000);

        Ok(())
    }

    #[test]
    fn test_symlink_kind_not_followed() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("target"), b"data")?;
        std::os::unix::fs::symlink("target", dir.path().join("link"))?;

        let metadata = FileMetadata::from_path(&dir.path().join("link"))?;
        assert_eq!(metadata.kind, NodeKind::Symlink);

        Ok(())
    }
}
