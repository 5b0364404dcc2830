//! Checksum sidecar format.
//!
//! One `digest  relative/path` line per regular file, in lexicographic path
//! order. As with `sha256sum`, a path holding a backslash, a newline or a
//! carriage return is escaped (`\\`, `\n`, `\r`) and its line starts with a
//! single `\` marker. Sidecars written by older releases hold bare digests
//! (one per line, no path); those load as [`ChecksumManifest::Legacy`].

use std::collections::BTreeSet;
use std::path::Path;

use crate::utils::errors::{BackupError, Result};

/// Digest of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumManifest {
    Entries(Vec<ManifestEntry>),

    /// Digests without paths
    Legacy(BTreeSet<String>),
}

impl ChecksumManifest {
    pub fn len(&self) -> usize {
        match self {
            ChecksumManifest::Entries(entries) => entries.len(),
            ChecksumManifest::Legacy(digests) => digests.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to sidecar text.
    pub fn to_sidecar(&self) -> String {
        let mut out = String::new();
        match self {
            ChecksumManifest::Entries(entries) => {
                for entry in entries {
                    if needs_escape(&entry.path) {
                        out.push('\\');
                        out.push_str(&entry.digest);
                        out.push_str("  ");
                        out.push_str(&escape(&entry.path));
                    } else {
                        out.push_str(&entry.digest);
                        out.push_str("  ");
                        out.push_str(&entry.path);
                    }
                    out.push('\n');
                }
            }
            ChecksumManifest::Legacy(digests) => {
                for digest in digests {
                    out.push_str(digest);
                    out.push('\n');
                }
            }
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_sidecar())
    }

    /// Load and parse a sidecar file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BackupError::ChecksumFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text).map_err(|message| BackupError::ChecksumFile {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut entries = Vec::new();
        let mut legacy = BTreeSet::new();

        for (idx, raw) in text.split('\n').enumerate() {
            // Only the terminator is stripped; trailing spaces belong to the path
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.trim().is_empty() {
                continue;
            }

            let (escaped, line) = match line.strip_prefix('\\') {
                Some(rest) => (true, rest),
                None => (false, line),
            };

            let (digest, path) = match line.split_once("  ") {
                Some((digest, path)) => (digest.trim(), Some(path)),
                None => (line.trim(), None),
            };

            if !is_sha256_hex(digest) {
                return Err(format!("line {}: '{}' is not a SHA-256 digest", idx + 1, digest));
            }

            match path {
                Some(path) if !path.is_empty() => {
                    let path = if escaped {
                        unescape(path).ok_or_else(|| format!("line {}: invalid escape in path", idx + 1))?
                    } else {
                        path.to_string()
                    };
                    entries.push(ManifestEntry {
                        path,
                        digest: digest.to_ascii_lowercase(),
                    });
                }
                _ if escaped => {
                    return Err(format!("line {}: escape marker without a path", idx + 1));
                }
                _ => {
                    legacy.insert(digest.to_ascii_lowercase());
                }
            }
        }

        match (entries.is_empty(), legacy.is_empty()) {
            (false, false) => Err("mixes path and bare digest lines".to_string()),
            (true, false) => Ok(ChecksumManifest::Legacy(legacy)),
            _ => Ok(ChecksumManifest::Entries(entries)),
        }
    }
}

fn needs_escape(path: &str) -> bool {
    path.contains(['\\', '\n', '\r'])
}

fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    for c in path.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(path: &str) -> Option<String> {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const D1: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    const D2: &str = "60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752";

    #[test]
    fn test_sidecar_lines() {
        let manifest = ChecksumManifest::Entries(vec![
            ManifestEntry { path: "conf/x.conf".into(), digest: D1.into() },
            ManifestEntry { path: "photos/a b.jpg".into(), digest: D2.into() },
        ]);
        let text = manifest.to_sidecar();
        assert_eq!(text, format!("{D1}  conf/x.conf\n{D2}  photos/a b.jpg\n"));
        assert_eq!(ChecksumManifest::parse(&text).unwrap(), manifest);
    }

    #[test]
    fn test_legacy_bare_digests() {
        let parsed = ChecksumManifest::parse(&format!("{D1}\n\n{D2}\n")).unwrap();
        match parsed {
            ChecksumManifest::Legacy(set) => assert_eq!(set.len(), 2),
            other => panic!("expected legacy manifest, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ChecksumManifest::parse("nothex  file\n").is_err());
        assert!(ChecksumManifest::parse(&format!("{D1}  a\n{D2}\n")).is_err());
    }

    #[test]
    fn test_paths_survive_sidecar() {
        let manifest = ChecksumManifest::Entries(vec![
            ManifestEntry { path: "notes ".into(), digest: D1.into() },
            ManifestEntry { path: "line\nbreak".into(), digest: D2.into() },
            ManifestEntry { path: "back\\slash\r".into(), digest: D1.into() },
        ]);
        let text = manifest.to_sidecar();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains(&format!("{D1}  notes \n")));
        assert!(text.contains(&format!("\\{D2}  line\\nbreak\n")));
        assert!(text.contains(&format!("\\{D1}  back\\\\slash\\r\n")));
        assert_eq!(ChecksumManifest::parse(&text).unwrap(), manifest);
    }

    #[test]
    fn test_crlf_terminators() {
        let parsed = ChecksumManifest::parse(&format!("{D1}  a.txt\r\n{D2}  b.txt\r\n")).unwrap();
        assert_eq!(
            parsed,
            ChecksumManifest::Entries(vec![
                ManifestEntry { path: "a.txt".into(), digest: D1.into() },
                ManifestEntry { path: "b.txt".into(), digest: D2.into() },
            ])
        );
    }

    #[test]
    fn test_rejects_bad_escapes() {
        assert!(ChecksumManifest::parse(&format!("\\{D1}  a\\qb\n")).is_err());
        assert!(ChecksumManifest::parse(&format!("\\{D1}\n")).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ChecksumManifest::load(Path::new("/nonexistent/x.sha256")).unwrap_err();
        assert!(matches!(err, BackupError::ChecksumFile { .. }));
    }
}
