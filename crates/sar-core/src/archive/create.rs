//! Create pipeline: walk roots and append entries to the archive

use super::{Archive, ArchiveType};
use crate::entry::{Entry, EntryKind};
use crate::{Error, Result};
use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

impl<'a> Archive<'a> {
    /// Archive every given root, depth first, sorted by file name.
    ///
    /// A directory root `some/dir` is stored under `dir/`; `.` and `..`
    /// are stored without a prefix. A non-directory root is stored under its
    /// own base name. Symlinks are archived as links, never followed. The
    /// first error aborts the call.
    pub fn archive_path<I, P>(&mut self, roots: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.setup_writer()?;

        for root in roots {
            let root = root.as_ref();
            let prepend = prepend_segment(root);
            info!(root = ?root, prefix = ?prepend, "Archiving path");

            let walker = WalkDir::new(root)
                .follow_links(false)
                .follow_root_links(false)
                .sort_by_file_name();

            for item in walker {
                let item = item?;
                let path = item.path();
                let meta = item.metadata()?;

                if item.depth() == 0 {
                    if !meta.is_dir() {
                        let name = root
                            .file_name()
                            .map(PathBuf::from)
                            .unwrap_or_else(|| root.to_path_buf());
                        self.add_entry(path, &name, &meta)?;
                        break;
                    }
                    if !prepend.as_os_str().is_empty() {
                        self.add_entry(path, &prepend, &meta)?;
                    }
                    continue;
                }

                let relative = path
                    .strip_prefix(root)
                    .map_err(|_| Error::InvalidPath(format!("{:?} is not under {:?}", path, root)))?;
                let name = archive_name(&prepend, relative);
                self.add_entry(path, &name, &meta)?;
            }
        }

        Ok(())
    }

    /// Append one filesystem object under `name`.
    ///
    /// `meta` must come from `symlink_metadata` of `path`. Sockets and FIFOs
    /// are skipped with a warning.
    pub fn add_entry(&mut self, path: &Path, name: &Path, meta: &Metadata) -> Result<()> {
        self.setup_writer()?;
        match self.archive_type {
            ArchiveType::Tar => self.append_tar(path, name, meta).map_err(|e| e.at(path)),
        }
    }

    fn append_tar(&mut self, path: &Path, name: &Path, meta: &Metadata) -> Result<()> {
        let link_target = if meta.file_type().is_symlink() {
            Some(fs::read_link(path)?)
        } else {
            None
        };

        let Some(mut entry) = Entry::from_metadata(name, meta, link_target) else {
            warn!(path = ?path, "Skipping unsupported file type");
            return Ok(());
        };
        if entry.kind == EntryKind::Regular {
            if let Some(first) = self.first_link_name(meta, name) {
                entry = entry.into_hard_link(first);
            }
        }

        let builder = self
            .builder
            .as_mut()
            .ok_or_else(|| Error::Setup("archive is set up for reading".to_string()))?;
        let mut header = entry.to_header()?;

        match entry.kind {
            EntryKind::Regular => {
                if self.read_limit > 0 && self.read_bytes + entry.size > self.read_limit {
                    return Err(Error::ReadLimitExceeded);
                }
                let file = File::open(path)?;
                let mut payload = CountingReader::new(file.take(entry.size));
                builder.append_data(&mut header, name, &mut payload)?;
                self.read_bytes += payload.count;
                if payload.count < entry.size {
                    return Err(Error::ShortRead {
                        expected: entry.size,
                        actual: payload.count,
                    });
                }
            }
            EntryKind::Symlink | EntryKind::HardLink => {
                let target = entry.link_target.as_deref().unwrap_or(Path::new(""));
                builder.append_link(&mut header, name, target)?;
            }
            EntryKind::Directory | EntryKind::CharDevice | EntryKind::BlockDevice => {
                builder.append_data(&mut header, name, io::empty())?;
            }
        }

        debug!(name = ?name, kind = ?entry.kind, size = entry.size, "Added entry");
        Ok(())
    }

    /// Name under which this file's inode was first archived, recording
    /// `name` if this is the first sighting
    #[cfg(unix)]
    fn first_link_name(&mut self, meta: &Metadata, name: &Path) -> Option<PathBuf> {
        use std::collections::hash_map::Entry as Slot;
        use std::os::unix::fs::MetadataExt;

        if meta.nlink() < 2 {
            return None;
        }
        match self.hard_links.entry((meta.dev(), meta.ino())) {
            Slot::Occupied(first) => Some(first.get().clone()),
            Slot::Vacant(slot) => {
                slot.insert(name.to_path_buf());
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn first_link_name(&mut self, _meta: &Metadata, _name: &Path) -> Option<PathBuf> {
        None
    }
}

/// Prefix for a root's descendants: its base name, empty for `.`, `..` and `/`
fn prepend_segment(root: &Path) -> PathBuf {
    match root.components().next_back() {
        Some(Component::Normal(name)) => PathBuf::from(name),
        _ => PathBuf::new(),
    }
}

/// Join prefix and relative path from normal components only, so the codec
/// writes it with `/` separators on every platform
fn archive_name(prepend: &Path, relative: &Path) -> PathBuf {
    let mut name = prepend.to_path_buf();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            name.push(part);
        }
    }
    name
}

/// Counts bytes handed to the codec
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_prepend_segment() {
        assert_eq!(prepend_segment(Path::new("some/dir")), PathBuf::from("dir"));
        assert_eq!(prepend_segment(Path::new("some/dir/")), PathBuf::from("dir"));
        assert_eq!(prepend_segment(Path::new("dir/.")), PathBuf::from("dir"));
        assert_eq!(prepend_segment(Path::new(".")), PathBuf::new());
        assert_eq!(prepend_segment(Path::new("..")), PathBuf::new());
        assert_eq!(prepend_segment(Path::new("a/..")), PathBuf::new());
        assert_eq!(prepend_segment(Path::new("/")), PathBuf::new());
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name(Path::new("dir"), Path::new("sub/file.txt")),
            PathBuf::from("dir/sub/file.txt")
        );
        assert_eq!(
            archive_name(Path::new(""), Path::new("file.txt")),
            PathBuf::from("file.txt")
        );
    }

    fn names(buf: &[u8]) -> BTreeSet<String> {
        let mut reader = tar::Archive::new(buf);
        reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_names_are_prefixed_with_root_base_name() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("project");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(root.join("README"), b"hi").unwrap();

        let mut buf = Vec::new();
        {
            let mut archive = Archive::tar().with_writer(&mut buf);
            archive.archive_path([&root]).unwrap();
            archive.close().unwrap();
        }

        let expected: BTreeSet<String> = ["project", "project/README", "project/src", "project/src/main.rs"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names(&buf), expected);
    }

    #[test]
    fn test_file_root_uses_base_name() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, b"remember").unwrap();

        let mut buf = Vec::new();
        {
            let mut archive = Archive::tar().with_writer(&mut buf);
            archive.archive_path([&file]).unwrap();
            archive.close().unwrap();
        }
        assert_eq!(names(&buf), BTreeSet::from(["notes.txt".to_string()]));
    }

    #[test]
    fn test_read_limit_checked_before_payload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("big.bin");
        fs::write(&file, vec![7u8; 4096]).unwrap();

        let mut archive = Archive::tar().with_writer(io::sink()).limit_data(1000);
        let err = archive.archive_path([&file]).unwrap_err();
        assert!(matches!(err.root_cause(), Error::ReadLimitExceeded));
        assert_eq!(archive.read_bytes(), 0);
    }

    #[test]
    fn test_short_read_is_distinct_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("shrinking.bin");
        fs::write(&file, vec![1u8; 2048]).unwrap();
        let stale = fs::symlink_metadata(&file).unwrap();
        fs::write(&file, vec![1u8; 100]).unwrap();

        let mut archive = Archive::tar().with_writer(io::sink());
        let err = archive
            .add_entry(&file, Path::new("shrinking.bin"), &stale)
            .unwrap_err();
        match err.root_cause() {
            Error::ShortRead { expected, actual } => {
                assert_eq!(*expected, 2048);
                assert_eq!(*actual, 100);
            }
            other => panic!("expected short read, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_second_name_of_inode_is_hard_link() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"shared").unwrap();
        fs::hard_link(root.join("a.txt"), root.join("b.txt")).unwrap();

        let mut buf = Vec::new();
        {
            let mut archive = Archive::tar().with_writer(&mut buf);
            archive.archive_path([&root]).unwrap();
            archive.close().unwrap();
        }

        let mut reader = tar::Archive::new(buf.as_slice());
        let links: Vec<(String, String)> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| e.header().entry_type() == tar::EntryType::Link)
            .map(|e| {
                (
                    e.path().unwrap().to_string_lossy().into_owned(),
                    e.link_name().unwrap().unwrap().to_string_lossy().into_owned(),
                )
            })
            .collect();
        assert_eq!(links, vec![("root/b.txt".to_string(), "root/a.txt".to_string())]);
    }
}
