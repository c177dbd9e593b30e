//! Archive entry model shared by the create and extract pipelines

use crate::{Error, Result};
use filetime::FileTime;
use std::fs::{self, Metadata};
use std::io;
use std::path::PathBuf;

/// The six kinds of filesystem object an archive can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    Regular,
    Symlink,
    HardLink,
    CharDevice,
    BlockDevice,
}

impl EntryKind {
    /// Map a codec entry type onto a kind, `None` for types we cannot rebuild
    pub fn from_tar(entry_type: tar::EntryType) -> Option<Self> {
        match entry_type {
            tar::EntryType::Directory => Some(EntryKind::Directory),
            tar::EntryType::Regular | tar::EntryType::Continuous => Some(EntryKind::Regular),
            tar::EntryType::Symlink => Some(EntryKind::Symlink),
            tar::EntryType::Link => Some(EntryKind::HardLink),
            tar::EntryType::Char => Some(EntryKind::CharDevice),
            tar::EntryType::Block => Some(EntryKind::BlockDevice),
            _ => None,
        }
    }

    pub fn to_tar(self) -> tar::EntryType {
        match self {
            EntryKind::Directory => tar::EntryType::Directory,
            EntryKind::Regular => tar::EntryType::Regular,
            EntryKind::Symlink => tar::EntryType::Symlink,
            EntryKind::HardLink => tar::EntryType::Link,
            EntryKind::CharDevice => tar::EntryType::Char,
            EntryKind::BlockDevice => tar::EntryType::Block,
        }
    }

    /// Kind of an object as reported by `symlink_metadata`
    pub fn from_file_type(file_type: fs::FileType) -> Option<Self> {
        if file_type.is_symlink() {
            return Some(EntryKind::Symlink);
        }
        if file_type.is_dir() {
            return Some(EntryKind::Directory);
        }
        if file_type.is_file() {
            return Some(EntryKind::Regular);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_char_device() {
                return Some(EntryKind::CharDevice);
            }
            if file_type.is_block_device() {
                return Some(EntryKind::BlockDevice);
            }
        }
        None
    }

    pub fn is_device(self) -> bool {
        matches!(self, EntryKind::CharDevice | EntryKind::BlockDevice)
    }
}

/// One filesystem object's record within an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Archive-relative name; written with `/` separators by the codec
    pub name: PathBuf,
    pub kind: EntryKind,
    /// Permission bits, including setuid/setgid/sticky
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    /// Payload size; zero for everything but regular files
    pub size: u64,
    pub mtime: FileTime,
    pub atime: FileTime,
    /// Symlink text or hard link target name
    pub link_target: Option<PathBuf>,
    pub dev_major: u32,
    pub dev_minor: u32,
}

impl Entry {
    /// Build an entry from `symlink_metadata` of the object.
    ///
    /// Returns `None` for objects no entry kind can represent (sockets, FIFOs).
    pub fn from_metadata(
        name: impl Into<PathBuf>,
        meta: &Metadata,
        link_target: Option<PathBuf>,
    ) -> Option<Self> {
        let kind = EntryKind::from_file_type(meta.file_type())?;
        let (dev_major, dev_minor) = device_numbers(meta, kind);

        Some(Self {
            name: name.into(),
            kind,
            mode: permission_bits(meta, kind),
            uid: owner_ids(meta).0,
            gid: owner_ids(meta).1,
            size: if kind == EntryKind::Regular { meta.len() } else { 0 },
            mtime: FileTime::from_last_modification_time(meta),
            atime: FileTime::from_last_access_time(meta),
            link_target: if kind == EntryKind::Symlink {
                link_target
            } else {
                None
            },
            dev_major,
            dev_minor,
        })
    }

    /// Turn a regular-file entry into a hard link to an already archived name
    pub fn into_hard_link(mut self, target: impl Into<PathBuf>) -> Self {
        self.kind = EntryKind::HardLink;
        self.size = 0;
        self.link_target = Some(target.into());
        self
    }

    /// Decode an entry from a codec header. `name` and `link_target` are
    /// passed separately since long names live outside the header block.
    pub fn from_header(
        header: &tar::Header,
        name: impl Into<PathBuf>,
        link_target: Option<PathBuf>,
    ) -> Result<Self> {
        let entry_type = header.entry_type();
        let kind = EntryKind::from_tar(entry_type)
            .ok_or_else(|| Error::UnsupportedEntryType(format!("{:?}", entry_type)))?;

        let mtime = header.mtime()?;
        let atime = header
            .as_gnu()
            .and_then(|gnu| gnu.atime().ok())
            .filter(|atime| *atime > 0)
            .unwrap_or(mtime);

        let (dev_major, dev_minor) = if kind.is_device() {
            (
                header.device_major()?.unwrap_or(0),
                header.device_minor()?.unwrap_or(0),
            )
        } else {
            (0, 0)
        };

        Ok(Self {
            name: name.into(),
            kind,
            mode: header.mode()?,
            // Blank owner fields occur in hand-made archives and read as root
            uid: header.uid().unwrap_or(0),
            gid: header.gid().unwrap_or(0),
            size: if kind == EntryKind::Regular {
                header.size()?
            } else {
                0
            },
            mtime: FileTime::from_unix_time(mtime as i64, 0),
            atime: FileTime::from_unix_time(atime as i64, 0),
            link_target,
            dev_major,
            dev_minor,
        })
    }

    /// Encode everything but the name and link target into a GNU header
    pub fn to_header(&self) -> io::Result<tar::Header> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(self.kind.to_tar());
        header.set_mode(self.mode);
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        header.set_size(self.size);
        header.set_mtime(unix_seconds(self.mtime));
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.set_atime(unix_seconds(self.atime));
        }
        if self.kind.is_device() {
            header.set_device_major(self.dev_major)?;
            header.set_device_minor(self.dev_minor)?;
        }
        Ok(header)
    }
}

fn unix_seconds(time: FileTime) -> u64 {
    time.unix_seconds().max(0) as u64
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata, _kind: EntryKind) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata, kind: EntryKind) -> u32 {
    match (kind, meta.permissions().readonly()) {
        (EntryKind::Directory, _) => 0o755,
        (_, true) => 0o444,
        (_, false) => 0o644,
    }
}

#[cfg(unix)]
fn owner_ids(meta: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid() as u64, meta.gid() as u64)
}

#[cfg(not(unix))]
fn owner_ids(_meta: &Metadata) -> (u64, u64) {
    (0, 0)
}

#[cfg(unix)]
fn device_numbers(meta: &Metadata, kind: EntryKind) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    if !kind.is_device() {
        return (0, 0);
    }
    let rdev = meta.rdev() as libc::dev_t;
    (libc::major(rdev) as u32, libc::minor(rdev) as u32)
}

#[cfg(not(unix))]
fn device_numbers(_meta: &Metadata, _kind: EntryKind) -> (u32, u32) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_mapping_covers_all_kinds() {
        for kind in [
            EntryKind::Directory,
            EntryKind::Regular,
            EntryKind::Symlink,
            EntryKind::HardLink,
            EntryKind::CharDevice,
            EntryKind::BlockDevice,
        ] {
            assert_eq!(EntryKind::from_tar(kind.to_tar()), Some(kind));
        }
        assert_eq!(EntryKind::from_tar(tar::EntryType::Fifo), None);
        assert_eq!(
            EntryKind::from_tar(tar::EntryType::Continuous),
            Some(EntryKind::Regular)
        );
    }

    #[test]
    fn test_regular_file_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, b"0123456789").unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        let atime = FileTime::from_unix_time(1_600_000_500, 0);
        filetime::set_file_times(&path, atime, mtime).unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        let entry = Entry::from_metadata("dir/data.bin", &meta, None).unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert_eq!(entry.size, 10);
        assert_eq!(entry.mtime, mtime);
        assert_eq!(entry.atime, atime);
        assert!(entry.link_target.is_none());
    }

    #[test]
    fn test_header_carries_times_and_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();
        filetime::set_file_times(
            &path,
            FileTime::from_unix_time(1_500_000_100, 0),
            FileTime::from_unix_time(1_500_000_000, 0),
        )
        .unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();
        let entry = Entry::from_metadata("data.bin", &meta, None).unwrap();

        let header = entry.to_header().unwrap();
        assert_eq!(header.entry_type(), tar::EntryType::Regular);
        assert_eq!(header.size().unwrap(), 3);
        assert_eq!(header.mtime().unwrap(), 1_500_000_000);
        assert_eq!(header.mode().unwrap(), entry.mode);

        let decoded = Entry::from_header(&header, "data.bin", None).unwrap();
        assert_eq!(decoded.atime, FileTime::from_unix_time(1_500_000_100, 0));
        assert_eq!(decoded.mtime, entry.mtime);
        assert_eq!(decoded.size, 3);
    }

    #[test]
    fn test_hard_link_has_no_payload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, b"payload").unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();

        let entry = Entry::from_metadata("copy.bin", &meta, None)
            .unwrap()
            .into_hard_link("data.bin");
        assert_eq!(entry.kind, EntryKind::HardLink);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.link_target, Some(PathBuf::from("data.bin")));
        assert_eq!(entry.to_header().unwrap().entry_type(), tar::EntryType::Link);
    }

    #[test]
    fn test_blank_owner_fields_read_as_zero() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(0);
        header.set_mtime(1_500_000_000);
        header.as_old_mut().uid = [0; 8];
        header.as_old_mut().gid = [b' '; 8];
        assert!(header.uid().is_err());

        let entry = Entry::from_header(&header, "plain.txt", None).unwrap();
        assert_eq!(entry.uid, 0);
        assert_eq!(entry.gid, 0);
        assert_eq!(entry.mode, 0o644);
    }

    #[test]
    fn test_unsupported_header_type() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Fifo);
        let err = Entry::from_header(&header, "pipe", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEntryType(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_keeps_link_text() {
        let temp_dir = TempDir::new().unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink("../somewhere/else", &link).unwrap();
        let meta = fs::symlink_metadata(&link).unwrap();

        let target = fs::read_link(&link).unwrap();
        let entry = Entry::from_metadata("link", &meta, Some(target)).unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.size, 0);
        assert_eq!(
            entry.link_target,
            Some(PathBuf::from("../somewhere/else"))
        );
    }
}
