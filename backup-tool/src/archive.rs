//! Compressed archives of a staged tree.
//!
//! [`Archiver`] is the seam the orchestrator talks to; [`TarArchiver`] drives
//! the system `tar` with gzip compression. Archives are rooted at `.` so they
//! unpack straight into whatever destination directory is chosen.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::fs::walker::count_entries;
use crate::progress::{Operation, ProgressUpdate};
use crate::signal::CancelHandle;
use crate::tools;
use crate::utils::errors::{BackupError, Result};

pub trait Archiver {
    /// Archive the whole of `tree` into `output`.
    fn pack(&self, tree: &Path, output: &Path, on_progress: &mut dyn FnMut(&ProgressUpdate)) -> Result<()>;

    /// Extract `archive` into the existing, empty directory `dest`.
    fn unpack(&self, archive: &Path, dest: &Path, on_progress: &mut dyn FnMut(&ProgressUpdate)) -> Result<()>;
}

/// gzip-compressed tar through the `tar` executable
pub struct TarArchiver {
    program: String,
    cancel: CancelHandle,
}

impl TarArchiver {
    pub fn new(program: impl Into<String>, cancel: CancelHandle) -> Self {
        Self {
            program: program.into(),
            cancel,
        }
    }

    /// Entry names of an archive, in archive order.
    pub fn list(&self, archive: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let out = tools::run(
            &self.program,
            [os("-tzf"), archive.as_os_str().to_os_string()],
            None,
            &self.cancel,
            |line| names.push(line.to_string()),
        )
        .map_err(|e| BackupError::Archive(format!("cannot run {}: {}", self.program, e)))?;

        self.cancel.check()?;
        if !out.success() {
            return Err(BackupError::Archive(format!(
                "failed to list archive content: {}",
                out.diagnostic()
            )));
        }
        Ok(names)
    }

    fn stream(
        &self,
        operation: Operation,
        args: Vec<std::ffi::OsString>,
        total: usize,
        on_progress: &mut dyn FnMut(&ProgressUpdate),
    ) -> Result<tools::ToolOutput> {
        let mut current = 0usize;
        let out = tools::run(&self.program, args, None, &self.cancel, |line| {
            current += 1;
            on_progress(&ProgressUpdate {
                operation,
                current: current.min(total),
                total,
                name: display_name(line),
                elapsed: None,
            });
        })
        .map_err(|e| BackupError::Archive(format!("cannot run {}: {}", self.program, e)))?;

        self.cancel.check()?;
        Ok(out)
    }
}

impl Archiver for TarArchiver {
    fn pack(&self, tree: &Path, output: &Path, on_progress: &mut dyn FnMut(&ProgressUpdate)) -> Result<()> {
        // `tar -v` also prints the root "./"
        let total = count_entries(tree)? + 1;
        info!("Archiving {} entries from {}", total, tree.display());

        let args = vec![
            os("-czvf"),
            output.as_os_str().to_os_string(),
            os("-C"),
            tree.as_os_str().to_os_string(),
            os("."),
        ];

        let out = self.stream(Operation::Compressing, args, total, on_progress);
        match out {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => {
                remove_partial(output);
                Err(BackupError::Archive(format!(
                    "cannot create compressed archive: {}",
                    out.diagnostic()
                )))
            }
            Err(e) => {
                remove_partial(output);
                Err(e)
            }
        }
    }

    fn unpack(&self, archive: &Path, dest: &Path, on_progress: &mut dyn FnMut(&ProgressUpdate)) -> Result<()> {
        let entries = self.list(archive)?;
        if entries.is_empty() {
            return Err(BackupError::Archive("archive is empty or corrupted".to_string()));
        }
        info!("Extracting {} entries into {}", entries.len(), dest.display());

        let args = vec![
            os("-xzvpf"),
            archive.as_os_str().to_os_string(),
            os("-C"),
            dest.as_os_str().to_os_string(),
        ];

        let out = self.stream(Operation::Extracting, args, entries.len(), on_progress)?;
        if !out.success() {
            return Err(BackupError::Archive(format!(
                "unable to extract compressed archive: {}",
                out.diagnostic()
            )));
        }
        Ok(())
    }
}

fn os(s: &str) -> std::ffi::OsString {
    s.into()
}

fn display_name(line: &str) -> String {
    let trimmed = line.trim_end_matches('/');
    PathBuf::from(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

fn remove_partial(path: &Path) {
    if path.exists() {
        debug!("Removing partial archive {}", path.display());
        let _ = std::fs::remove_file(path);
    }
}
