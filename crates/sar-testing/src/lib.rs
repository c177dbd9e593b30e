//! Testing utilities and fixtures for sar
//!
//! This crate provides temporary directory helpers, standard file trees and
//! tree comparison assertions shared by the sar test suites.

use anyhow::Result;
use filetime::FileTime;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub mod assertions;
pub mod fixtures;

/// Creates a temporary test directory with cleanup on drop
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates a new temporary test directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    /// Returns the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates a file with the given name and content in the test directory
    pub fn create_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Creates a directory with the given name in the test directory
    pub fn create_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Creates a symlink `name` whose link text is `target`
    #[cfg(unix)]
    pub fn create_symlink(&self, target: &str, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::os::unix::fs::symlink(target, &path)?;
        Ok(path)
    }

    /// Sets both access and modification time of `name` to `unix_seconds`
    pub fn set_times(&self, name: &str, unix_seconds: i64) -> Result<()> {
        let time = FileTime::from_unix_time(unix_seconds, 0);
        filetime::set_symlink_file_times(self.dir.path().join(name), time, time)?;
        Ok(())
    }
}
