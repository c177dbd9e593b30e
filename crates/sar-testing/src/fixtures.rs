//! Common test fixtures for sar testing

use crate::TestDir;
use anyhow::Result;

/// Creates a standard test file structure
pub fn create_test_files(test_dir: &TestDir) -> Result<()> {
    test_dir.create_file("file1.txt", b"This is file 1 content.")?;
    test_dir.create_file("file2.txt", b"This is file 2 content.")?;

    test_dir.create_dir("subdir")?;
    test_dir.create_file("subdir/file3.txt", b"This is file 3 in subdir.")?;

    test_dir.create_file("image.jpg", &[0xFF, 0xD8, 0xFF, 0xE0])?;
    test_dir.create_file("empty.dat", b"")?;

    // Spans several tar blocks
    let large_content = "x".repeat(256 * 1024);
    test_dir.create_file("large.log", large_content.as_bytes())?;

    Ok(())
}

/// Creates a nested tree with an empty directory and a name longer than
/// 100 bytes
pub fn create_archive_structure(test_dir: &TestDir) -> Result<()> {
    create_test_files(test_dir)?;

    test_dir.create_file("README.md", b"# Test Archive\n\nThis is a test archive.")?;
    test_dir.create_file(".hidden", b"target/\n*.tmp")?;

    test_dir.create_file("src/main.rs", b"fn main() {}")?;
    test_dir.create_file("src/modules/mod.rs", b"pub mod utils;")?;
    test_dir.create_dir("empty_dir")?;

    let long_name = format!("deep/{}.txt", "n".repeat(120));
    test_dir.create_file(&long_name, b"long name")?;

    Ok(())
}

/// Creates a symlink test structure (Unix only)
#[cfg(unix)]
pub fn create_symlink_structure(test_dir: &TestDir) -> Result<()> {
    test_dir.create_file("file1.txt", b"Original file")?;
    test_dir.create_dir("subdir")?;

    test_dir.create_symlink("file1.txt", "link_to_file1.txt")?;
    test_dir.create_symlink("../file1.txt", "subdir/link_to_parent_file.txt")?;
    test_dir.create_symlink("does/not/exist", "dangling")?;

    Ok(())
}

/// Creates two names for one file plus an unrelated file (Unix only)
#[cfg(unix)]
pub fn create_hardlink_structure(test_dir: &TestDir) -> Result<()> {
    let original = test_dir.create_file("original.txt", b"shared bytes")?;
    test_dir.create_dir("links")?;
    std::fs::hard_link(&original, test_dir.path().join("links/second.txt"))?;
    test_dir.create_file("single.txt", b"only one name")?;
    Ok(())
}
