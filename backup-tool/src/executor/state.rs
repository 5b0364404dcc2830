//! Orchestrator states.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Parsing,
    Staging,
    Checksumming,
    Archiving,
    Encrypting,
    Decrypting,
    Extracting,
    Verifying,
    Finalizing,
    Done,
    Failed,
}

impl Stage {
    /// Line printed when the stage begins.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Parsing => "Parsing sources file...",
            Stage::Staging => "Copying sources...",
            Stage::Checksumming => "Computing checksums...",
            Stage::Archiving => "Compressing backup...",
            Stage::Encrypting => "Encrypting backup...",
            Stage::Decrypting => "Decrypting backup...",
            Stage::Extracting => "Extracting backup...",
            Stage::Verifying => "Verifying backup...",
            Stage::Finalizing => "Finalizing...",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
