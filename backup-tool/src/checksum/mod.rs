//! SHA-256 checksums of staged and extracted trees.
//!
//! [`compute`] produces the manifest written next to the artifact;
//! [`verify`] re-hashes an extracted tree against it and collects every
//! discrepancy instead of stopping at the first one.

pub mod manifest;

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::fs::walker::regular_files;
use crate::progress::{Operation, ProgressUpdate};
use crate::signal::CancelHandle;
use crate::utils::errors::{BackupError, Result};
pub use manifest::{ChecksumManifest, ManifestEntry};

const READ_BLOCK: usize = 64 * 1024;

/// Hex SHA-256 of a file's full contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BLOCK];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash every regular file under `tree`.
///
/// A file name that is not valid UTF-8 cannot be written to the sidecar
/// faithfully and fails the run with `Checksum`.
pub fn compute<F>(tree: &Path, cancel: &CancelHandle, mut on_progress: F) -> Result<ChecksumManifest>
where
    F: FnMut(&ProgressUpdate),
{
    let files = regular_files(tree)?;
    if let Some(bad) = files
        .iter()
        .find(|f| f.path.strip_prefix(tree).ok().and_then(Path::to_str).is_none())
    {
        return Err(BackupError::Checksum {
            path: bad.path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "file name is not valid UTF-8",
            ),
        });
    }
    let total = files.len();
    let mut entries = Vec::with_capacity(total);

    for (idx, file) in files.into_iter().enumerate() {
        cancel.check()?;

        let digest = hash_file(&file.path).map_err(|source| BackupError::Checksum {
            path: file.path.clone(),
            source,
        })?;

        on_progress(&ProgressUpdate {
            operation: Operation::Hashing,
            current: idx + 1,
            total,
            name: file_name(&file.relative_path),
            elapsed: None,
        });

        entries.push(ManifestEntry {
            path: file.relative_path,
            digest,
        });
    }

    debug!("Hashed {} files under {}", entries.len(), tree.display());
    Ok(ChecksumManifest::Entries(entries))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiscrepancyReason {
    /// Content hash differs
    Mismatch,
    /// Listed in the manifest, absent from the tree
    Missing,
    /// Present in the tree, absent from the manifest
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Discrepancy {
    pub path: String,
    pub reason: DiscrepancyReason,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.reason {
            DiscrepancyReason::Mismatch => "checksum mismatch",
            DiscrepancyReason::Missing => "missing",
            DiscrepancyReason::Unexpected => "not in checksum file",
        };
        write!(f, "{}: {}", self.path, what)
    }
}

/// Outcome of [`verify`]; empty means every file checked out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl VerificationResult {
    pub fn is_ok(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn count(&self, reason: DiscrepancyReason) -> usize {
        self.discrepancies.iter().filter(|d| d.reason == reason).count()
    }
}

/// Re-hash `tree` against `manifest`.
///
/// Only cancellation and an unreadable tree are errors; a file that cannot
/// be hashed counts as a mismatch.
pub fn verify<F>(
    tree: &Path,
    manifest: &ChecksumManifest,
    cancel: &CancelHandle,
    mut on_progress: F,
) -> Result<VerificationResult>
where
    F: FnMut(&ProgressUpdate),
{
    let present: BTreeMap<String, std::path::PathBuf> = regular_files(tree)?
        .into_iter()
        .map(|f| (f.relative_path, f.path))
        .collect();

    let mut result = VerificationResult::default();

    match manifest {
        ChecksumManifest::Entries(entries) => {
            let total = entries.len();
            let mut listed = BTreeSet::new();

            for (idx, entry) in entries.iter().enumerate() {
                cancel.check()?;
                listed.insert(entry.path.as_str());

                match present.get(&entry.path) {
                    None => result.discrepancies.push(Discrepancy {
                        path: entry.path.clone(),
                        reason: DiscrepancyReason::Missing,
                    }),
                    Some(full) => {
                        result.checked += 1;
                        if !digest_matches(full, |d| d == entry.digest) {
                            result.discrepancies.push(Discrepancy {
                                path: entry.path.clone(),
                                reason: DiscrepancyReason::Mismatch,
                            });
                        }
                    }
                }

                on_progress(&ProgressUpdate {
                    operation: Operation::Verifying,
                    current: idx + 1,
                    total,
                    name: file_name(&entry.path),
                    elapsed: None,
                });
            }

            for rel in present.keys() {
                if !listed.contains(rel.as_str()) {
                    result.discrepancies.push(Discrepancy {
                        path: rel.clone(),
                        reason: DiscrepancyReason::Unexpected,
                    });
                }
            }
        }
        ChecksumManifest::Legacy(digests) => {
            let total = present.len();

            for (idx, (rel, full)) in present.iter().enumerate() {
                cancel.check()?;
                result.checked += 1;

                if !digest_matches(full, |d| digests.contains(d)) {
                    result.discrepancies.push(Discrepancy {
                        path: rel.clone(),
                        reason: DiscrepancyReason::Mismatch,
                    });
                }

                on_progress(&ProgressUpdate {
                    operation: Operation::Verifying,
                    current: idx + 1,
                    total,
                    name: file_name(rel),
                    elapsed: None,
                });
            }
        }
    }

    result.discrepancies.sort();
    Ok(result)
}

fn digest_matches(path: &Path, accept: impl Fn(&str) -> bool) -> bool {
    match hash_file(path) {
        Ok(digest) => accept(&digest),
        Err(e) => {
            warn!("Cannot hash {}: {}", path.display(), e);
            false
        }
    }
}

fn file_name(relative: &str) -> String {
    relative.rsplit('/').next().unwrap_or(relative).to_string()
}
