//! Common assertions for sar testing

use anyhow::Result;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Asserts that two directory trees hold the same relative paths, object
/// types, file contents and link texts. Permission bits are compared on Unix.
pub fn assert_dirs_equal(dir1: &Path, dir2: &Path) -> Result<()> {
    let entries1 = collect_entries(dir1)?;
    let entries2 = collect_entries(dir2)?;

    assert_eq!(
        entries1, entries2,
        "Different entries under {:?} and {:?}",
        dir1, dir2
    );

    for relative in &entries1 {
        let path1 = dir1.join(relative);
        let path2 = dir2.join(relative);
        let meta1 = fs::symlink_metadata(&path1)?;
        let meta2 = fs::symlink_metadata(&path2)?;

        assert_eq!(
            meta1.file_type(),
            meta2.file_type(),
            "File type mismatch for {:?}",
            relative
        );

        if meta1.is_file() {
            assert_eq!(
                fs::read(&path1)?,
                fs::read(&path2)?,
                "Content mismatch for {:?}",
                relative
            );
        }

        if meta1.file_type().is_symlink() {
            assert_eq!(
                fs::read_link(&path1)?,
                fs::read_link(&path2)?,
                "Link target mismatch for {:?}",
                relative
            );
            continue;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(
                meta1.permissions().mode() & 0o7777,
                meta2.permissions().mode() & 0o7777,
                "Permission mismatch for {:?}",
                relative
            );
        }
    }

    Ok(())
}

/// Asserts that a file has specific permissions (Unix only)
#[cfg(unix)]
pub fn assert_file_permissions(path: &Path, expected: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)?;
    let mode = metadata.permissions().mode() & 0o7777;

    assert_eq!(
        mode, expected,
        "Permission mismatch for {:?}: expected {:o}, got {:o}",
        path, expected, mode
    );

    Ok(())
}

/// Asserts the modification time of `path`, not following symlinks
pub fn assert_mtime(path: &Path, unix_seconds: i64) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    let mtime = FileTime::from_last_modification_time(&metadata).unix_seconds();
    assert_eq!(mtime, unix_seconds, "Modification time mismatch for {:?}", path);
    Ok(())
}

/// Relative paths of everything below `dir`, sorted
fn collect_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry?;
        entries.push(entry.path().strip_prefix(dir)?.to_path_buf());
    }
    entries.sort();
    Ok(entries)
}
