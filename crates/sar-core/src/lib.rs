//! sar - a sequential archive engine
//!
//! This library streams filesystem trees into tar archives (optionally
//! gzip-compressed, optionally size-limited) and restores them with conflict
//! handling, metadata restoration and platform-specific link reconstruction.

pub mod archive;
pub mod config;
pub mod entry;
pub mod error;
pub mod limit;
pub mod platform;
pub mod security;

pub use error::{Error, Result};

// Re-export commonly used types
pub use archive::{
    Archive, ArchiveType, Compressor, ConflictPolicy, ConflictResolver, ExtractOptions,
    ExtractSummary, Prompt, PromptChoice, Resolution,
};
pub use entry::{Entry, EntryKind};
pub use limit::LimitWriter;
pub use platform::{CopyPlatform, Platform};

#[cfg(unix)]
pub use platform::PosixPlatform;
