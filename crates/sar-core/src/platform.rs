//! Platform reconstruction of links, device nodes and ownership
//!
//! The extract pipeline only talks to the [`Platform`] trait. Which
//! implementation is used is decided at build time by [`native`], or by the
//! caller through `Archive::extract_with_platform`.

use crate::entry::EntryKind;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;

/// Primitives that differ between link-capable and link-limited targets
pub trait Platform {
    /// Create `link` as a hard link to the already extracted `original`
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;

    /// Create `link` as a symbolic link.
    ///
    /// `target` is the raw link text from the archive, `resolved` is where
    /// that text points to inside the destination, if it points inside it.
    fn symlink(&self, target: &Path, resolved: Option<&Path>, link: &Path) -> io::Result<()>;

    /// Create a character or block device node
    fn device(&self, path: &Path, kind: EntryKind, mode: u32, major: u32, minor: u32)
        -> io::Result<()>;

    fn set_owner(&self, path: &Path, uid: u64, gid: u64) -> io::Result<()>;
}

/// The implementation matching the build target
pub fn native() -> &'static dyn Platform {
    #[cfg(unix)]
    {
        &PosixPlatform
    }
    #[cfg(not(unix))]
    {
        &CopyPlatform
    }
}

/// Native links, `mknod` and `chown`
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixPlatform;

#[cfg(unix)]
impl Platform for PosixPlatform {
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        remove_existing(link);
        fs::hard_link(original, link)
    }

    fn symlink(&self, target: &Path, _resolved: Option<&Path>, link: &Path) -> io::Result<()> {
        remove_existing(link);
        std::os::unix::fs::symlink(target, link)
    }

    fn device(
        &self,
        path: &Path,
        kind: EntryKind,
        mode: u32,
        major: u32,
        minor: u32,
    ) -> io::Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let type_bits = match kind {
            EntryKind::CharDevice => libc::S_IFCHR,
            EntryKind::BlockDevice => libc::S_IFBLK,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a device entry: {:?}", other),
                ))
            }
        };
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let dev = libc::makedev(major as _, minor as _);

        remove_existing(path);
        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let rc = unsafe {
            libc::mknod(
                c_path.as_ptr(),
                type_bits | (mode as libc::mode_t & 0o7777),
                dev,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_owner(&self, path: &Path, uid: u64, gid: u64) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid as u32), Some(gid as u32))
    }
}

/// Link-limited targets: links become copies, devices and owners are ignored
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyPlatform;

impl Platform for CopyPlatform {
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        copy_file(original, link)
    }

    fn symlink(&self, target: &Path, resolved: Option<&Path>, link: &Path) -> io::Result<()> {
        match resolved {
            Some(source) => copy_file(source, link),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!(
                    "symlink target {} lies outside the destination, cannot copy",
                    target.display()
                ),
            )),
        }
    }

    fn device(
        &self,
        path: &Path,
        _kind: EntryKind,
        _mode: u32,
        _major: u32,
        _minor: u32,
    ) -> io::Result<()> {
        debug!(path = ?path, "Device nodes are not supported here, skipping");
        Ok(())
    }

    fn set_owner(&self, _path: &Path, _uid: u64, _gid: u64) -> io::Result<()> {
        Ok(())
    }
}

/// Copy content and permission bits of `src` to `dst`, keeping the mtime
fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    let src_meta = fs::metadata(src)?;
    if !src_meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not a regular file, cannot copy", src.display()),
        ));
    }

    if let Ok(existing) = fs::symlink_metadata(dst) {
        if !existing.is_file() {
            remove_existing(dst);
        }
    }

    let mut reader = File::open(src)?;
    let mut writer = File::create(dst)?;
    io::copy(&mut reader, &mut writer)?;
    drop(writer);

    fs::set_permissions(dst, src_meta.permissions())?;
    let mtime = filetime::FileTime::from_last_modification_time(&src_meta);
    filetime::set_file_times(dst, mtime, mtime)
}

/// Best-effort removal; failures surface in the creation step that follows
pub(crate) fn remove_existing(path: &Path) {
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = removed {
        debug!(path = ?path, error = %e, "Failed to remove existing object");
    }
}
