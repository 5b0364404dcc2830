//! Configuration management for the backup tool.
//!
//! Loads configuration from a TOML file; every field has a default so an
//! empty file (or no file at all) is valid.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub tools: ToolsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Fixed token every artifact name starts with
    pub base_name: String,

    /// Descriptive tag (defaults to the host name)
    pub tag: Option<String>,

    /// Directory for staging trees and intermediate archives
    /// (defaults to the output directory)
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Archiver executable
    pub tar: String,

    /// Encryption executable
    pub gpg: String,

    /// Symmetric cipher passed to gpg
    pub cipher_algo: String,

    /// ASCII-armor the encrypted artifact
    pub armor: bool,

    /// Alternative gpg home directory
    pub gpg_homedir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            base_name: default_base_name(),
            tag: None,
            work_dir: None,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tar: "tar".to_string(),
            gpg: "gpg".to_string(),
            cipher_algo: "AES256".to_string(),
            armor: true,
            gpg_homedir: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

fn default_base_name() -> String {
    "backup".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !is_safe_name(&self.backup.base_name) {
            return Err(BackupError::Config(format!(
                "base_name '{}' must be a non-empty file name",
                self.backup.base_name
            )));
        }
        if let Some(tag) = &self.backup.tag {
            if !is_safe_name(tag) {
                return Err(BackupError::Config(format!(
                    "tag '{}' must be a non-empty file name",
                    tag
                )));
            }
        }
        Ok(())
    }

    /// Tag used in artifact names: the configured one, else the host name.
    pub fn resolve_tag(&self) -> String {
        if let Some(tag) = &self.backup.tag {
            return tag.clone();
        }
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        sanitize_tag(&host)
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// Replace characters that do not belong in a file name.
pub fn sanitize_tag(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "localhost".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Settings owned by a single run. Every temporary and final path is derived
/// from here, so two runs never share a temporary name.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: Uuid,
    pub base_name: String,
    pub tag: String,
    pub date: NaiveDate,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl RunConfig {
    pub fn new(config: &Config, output_dir: &Path) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            base_name: config.backup.base_name.clone(),
            tag: config.resolve_tag(),
            date: Local::now().date_naive(),
            output_dir: output_dir.to_path_buf(),
            work_dir: config
                .backup
                .work_dir
                .clone()
                .unwrap_or_else(|| output_dir.to_path_buf()),
        }
    }

    /// `<base>-<tag>-<YYYYMMDD>`
    pub fn artifact_stem(&self) -> String {
        format!(
            "{}-{}-{}",
            self.base_name,
            self.tag,
            self.date.format("%Y%m%d")
        )
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", self.artifact_stem(), ARTIFACT_SUFFIX))
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", self.artifact_stem(), SIDECAR_SUFFIX))
    }

    fn temp_name(&self, suffix: &str) -> PathBuf {
        let short_id = self.run_id.simple().to_string();
        self.work_dir
            .join(format!("{}-{}{}", self.base_name, &short_id[..12], suffix))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.temp_name(".tmp")
    }

    pub fn temp_archive(&self) -> PathBuf {
        self.temp_name(".tar.gz")
    }

    pub fn temp_encrypted(&self) -> PathBuf {
        self.temp_name(".tar.gz.enc.part")
    }

    pub fn temp_sidecar(&self) -> PathBuf {
        self.temp_name(".sha256.part")
    }
}

pub const ARTIFACT_SUFFIX: &str = ".tar.gz.enc";
pub const SIDECAR_SUFFIX: &str = ".sha256";

/// Conventional sidecar location for an artifact.
pub fn sidecar_for(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name.strip_suffix(ARTIFACT_SUFFIX).unwrap_or(&name);
    artifact.with_file_name(format!("{}{}", stem, SIDECAR_SUFFIX))
}

/// Name of the directory an artifact extracts into.
pub fn extraction_name(artifact: &Path) -> String {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix(ARTIFACT_SUFFIX) {
        if !stem.is_empty() {
            return stem.to_string();
        }
    }
    if let Some(stem) = name.strip_suffix(".enc") {
        if !stem.is_empty() {
            return stem.to_string();
        }
    }
    format!("{}.extracted", name)
}
