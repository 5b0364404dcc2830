//! Custom error types for the backup tool.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Missing dependencies: {}", .0.join(", "))]
    DependencyMissing(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read sources file {}: {source}", path.display())]
    SourcesRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    SourcesParse { line: Option<usize>, message: String },

    #[error("Path does not exist: {} (line {line})", path.display())]
    PathNotFound { line: usize, path: PathBuf },

    #[error("Copy failed for '{label}': {source}")]
    Copy {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to hash {}: {source}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid checksum file {}: {message}", path.display())]
    ChecksumFile { path: PathBuf, message: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Invalid passphrase: {0}")]
    Passphrase(String),

    #[error("Output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Operation interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Parse error bound to a line of the sources file.
    pub fn parse_at(line: usize, message: impl Into<String>) -> Self {
        BackupError::SourcesParse {
            line: Some(line),
            message: message.into(),
        }
    }

    pub fn copy(label: &str, source: std::io::Error) -> Self {
        BackupError::Copy {
            label: label.to_string(),
            source,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Interrupted => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
