//! Filesystem helpers: tree walking, metadata preservation and staging.

pub mod metadata;
pub mod stager;
pub mod walker;
