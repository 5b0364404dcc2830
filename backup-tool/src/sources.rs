//! Sources file parsing.
//!
//! The format is line oriented UTF-8: `label=path` entries, `#` comments and
//! blank lines. A trailing path separator marks a directory entry. Archives
//! made from older sources files must stay reproducible, so the rules here
//! only ever get stricter about things that could not have worked before.

use std::collections::HashSet;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tracing::debug;

use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One `label=path` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub label: String,
    pub path: PathBuf,
    pub kind: EntryKind,

    /// 1-based line in the sources file
    pub line: usize,
}

/// Entries in file order
#[derive(Debug, Clone, Default)]
pub struct SourcesFile {
    pub entries: Vec<SourceEntry>,
}

impl SourcesFile {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceEntry> {
        self.entries.iter()
    }
}

/// Read and validate a sources file.
pub fn parse(path: &Path) -> Result<SourcesFile> {
    let content = std::fs::read_to_string(path).map_err(|source| BackupError::SourcesRead {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_str(&content, base_dir)
}

/// Parse sources text; relative paths resolve against `base_dir`.
pub fn parse_str(content: &str, base_dir: &Path) -> Result<SourcesFile> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (label, path_str) = line.split_once('=').ok_or_else(|| {
            BackupError::parse_at(line_no, format!("invalid format at line {}: '{}'", line_no, line))
        })?;
        let label = label.trim();
        let path_str = path_str.trim();

        if label.is_empty() {
            return Err(BackupError::parse_at(
                line_no,
                format!("empty label at line {}", line_no),
            ));
        }
        if label == "." || label == ".." || label.contains('/') || label.contains(MAIN_SEPARATOR) {
            return Err(BackupError::parse_at(
                line_no,
                format!("invalid label '{}' at line {}", label, line_no),
            ));
        }
        if path_str.is_empty() {
            return Err(BackupError::parse_at(
                line_no,
                format!("empty path for '{}' at line {}", label, line_no),
            ));
        }
        if !seen.insert(label.to_string()) {
            return Err(BackupError::parse_at(
                line_no,
                format!("duplicate label '{}' at line {}", label, line_no),
            ));
        }

        let kind = classify(path_str);
        let path = {
            let p = PathBuf::from(path_str);
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        };

        if !path.exists() {
            return Err(BackupError::PathNotFound {
                line: line_no,
                path,
            });
        }

        debug!("Source '{}' -> {} ({:?})", label, path.display(), kind);

        entries.push(SourceEntry {
            label: label.to_string(),
            path,
            kind,
            line: line_no,
        });
    }

    if entries.is_empty() {
        return Err(BackupError::SourcesParse {
            line: None,
            message: "No valid sources found in file".to_string(),
        });
    }

    Ok(SourcesFile { entries })
}

fn classify(path_str: &str) -> EntryKind {
    if path_str.ends_with('/') || path_str.ends_with(MAIN_SEPARATOR) {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}
