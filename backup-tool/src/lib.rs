//! Backup Tool Library
//!
//! Stages labeled filesystem paths, archives them with `tar`, encrypts the
//! archive with `gpg` and optionally writes per-file SHA-256 checksums. The
//! inverse flow decrypts, extracts and verifies.

pub mod archive;
pub mod checksum;
pub mod cipher;
pub mod config;
pub mod executor;
pub mod fs;
pub mod progress;
pub mod signal;
pub mod sources;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupRequest, ExtractRequest, Orchestrator};
pub use utils::errors::{BackupError, Result};
