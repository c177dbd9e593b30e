//! Extract pipeline: rebuild archived entries under a destination directory

use super::conflict::{ConflictResolver, Prompt, Resolution};
use super::Archive;
use crate::entry::{Entry, EntryKind};
use crate::platform::{self, Platform};
use crate::security::{ensure_inside, normalize_name, resolve_link_target};
use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, DirBuilder, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options for extracting archives
pub struct ExtractOptions {
    /// Log every extracted path at info level
    pub verbose: bool,
    /// Replace existing objects without asking
    pub overwrite: bool,
    /// Ask through `prompt` when an object exists and `overwrite` is off
    pub interactive: bool,
    /// Restore uid/gid
    pub restore_owner: bool,
    /// Restore access and modification times
    pub restore_timestamps: bool,
    /// Stop at the first per-entry error
    pub fail_fast: bool,
    pub prompt: Option<Box<dyn Prompt>>,
    /// Receives one line per per-entry error
    pub error_log: Option<Box<dyn Write>>,
    /// Per-entry errors collected during the last extraction
    pub errors: Vec<Error>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            overwrite: true,
            interactive: true,
            restore_owner: false,
            restore_timestamps: true,
            fail_fast: false,
            prompt: None,
            error_log: None,
            errors: Vec::new(),
        }
    }
}

impl fmt::Debug for ExtractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("verbose", &self.verbose)
            .field("overwrite", &self.overwrite)
            .field("interactive", &self.interactive)
            .field("restore_owner", &self.restore_owner)
            .field("restore_timestamps", &self.restore_timestamps)
            .field("fail_fast", &self.fail_fast)
            .field("prompt", &self.prompt.is_some())
            .field("error_log", &self.error_log.is_some())
            .field("errors", &self.errors)
            .finish()
    }
}

/// Outcome of one extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: usize,
    /// Existing objects left untouched
    pub skipped: Vec<PathBuf>,
    pub failed: usize,
}

impl<'a> Archive<'a> {
    /// Extract into `dest` using the reconstruction primitives of this platform.
    ///
    /// See [`Archive::extract_with_platform`].
    pub fn extract(
        &mut self,
        dest: impl AsRef<Path>,
        opts: &mut ExtractOptions,
    ) -> Result<ExtractSummary> {
        self.extract_with_platform(dest, opts, platform::native())
    }

    /// Extract every entry into the existing directory `dest`.
    ///
    /// Per-entry failures are collected in `opts.errors` unless
    /// `opts.fail_fast` is set, in which case the first one is returned.
    /// The handle is closed on every path past destination validation.
    pub fn extract_with_platform(
        &mut self,
        dest: impl AsRef<Path>,
        opts: &mut ExtractOptions,
        platform: &dyn Platform,
    ) -> Result<ExtractSummary> {
        let dest = dest.as_ref();
        let root_meta = match fs::metadata(dest) {
            Ok(meta) if meta.is_dir() => meta,
            Ok(_) => return Err(Error::DestinationNotDirectory(dest.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::DestinationMissing(dest.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        info!(dest = ?dest, "Extracting archive");
        let result = self
            .setup_reader()
            .and_then(|()| self.extract_entries(dest, &root_meta, opts, platform));
        let closed = self.close();

        let summary = result?;
        closed?;
        info!(
            "Extraction finished: {} extracted, {} skipped, {} failed",
            summary.extracted,
            summary.skipped.len(),
            summary.failed
        );
        Ok(summary)
    }

    fn extract_entries(
        &mut self,
        dest: &Path,
        root_meta: &Metadata,
        opts: &mut ExtractOptions,
        platform: &dyn Platform,
    ) -> Result<ExtractSummary> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::Setup("archive is set up for writing".to_string()))?;

        let mut run = Extraction::new(dest, root_meta, opts, platform)?;
        for entry in reader.entries()? {
            let mut entry = entry?;
            run.process(&mut entry)?;
        }
        run.finish()
    }
}

/// State of one extraction call
struct Extraction<'o> {
    root: PathBuf,
    canonical_root: PathBuf,
    root_mode: u32,
    opts: &'o mut ExtractOptions,
    platform: &'o dyn Platform,
    resolver: ConflictResolver,
    /// Directories known to exist and to resolve inside the root
    verified: HashSet<PathBuf>,
    /// Directories whose metadata is applied once all entries are written
    pending_dirs: Vec<(PathBuf, Entry)>,
    summary: ExtractSummary,
}

impl<'o> Extraction<'o> {
    fn new(
        root: &Path,
        root_meta: &Metadata,
        opts: &'o mut ExtractOptions,
        platform: &'o dyn Platform,
    ) -> Result<Self> {
        let can_ask = opts.interactive && opts.prompt.as_ref().is_some_and(|p| p.is_available());
        let resolver = ConflictResolver::new(opts.overwrite, can_ask);
        opts.errors.clear();

        Ok(Self {
            root: root.to_path_buf(),
            canonical_root: root.canonicalize()?,
            root_mode: dir_mode(root_meta),
            opts,
            platform,
            resolver,
            verified: HashSet::new(),
            pending_dirs: Vec::new(),
            summary: ExtractSummary::default(),
        })
    }

    fn process<R: Read>(&mut self, entry: &mut tar::Entry<'_, R>) -> Result<()> {
        let raw_name = entry.path()?.into_owned();
        let raw_link = entry.link_name()?.map(|link| link.into_owned());

        let name = match normalize_name(&raw_name) {
            Ok(name) => name,
            Err(e) => return self.fail(self.root.join(&raw_name), e),
        };
        if name.as_os_str().is_empty() {
            debug!(name = ?raw_name, "Skipping entry with empty name");
            return Ok(());
        }
        let path = self.root.join(&name);

        let record = match Entry::from_header(entry.header(), &name, raw_link) {
            Ok(record) => record,
            Err(e) => return self.fail(path, e),
        };

        // Nothing is looked up, removed or created below an unchecked parent
        if let Err(e) = self.prepare_parent(&name) {
            return self.fail(path, e);
        }

        match fs::symlink_metadata(&path) {
            Ok(existing) if record.kind == EntryKind::Directory && existing.is_dir() => {
                if !self.resolver.overwrites() {
                    self.skip(path);
                    return Ok(());
                }
                debug!(path = ?path, "Merging into existing directory");
            }
            Ok(_) => match self.resolver.resolve(&path, self.opts.prompt.as_deref_mut())? {
                Resolution::Skip => {
                    self.skip(path);
                    return Ok(());
                }
                Resolution::Replace => {
                    platform::remove_existing(&path);
                    self.verified.clear();
                    if let Err(e) = self.prepare_parent(&name) {
                        return self.fail(path, e);
                    }
                }
            },
            Err(_) => {}
        }

        if self.opts.verbose {
            info!("Extracting: {}", path.display());
        } else {
            debug!(path = ?path, kind = ?record.kind, "Extracting entry");
        }

        let built = match record.kind {
            EntryKind::Directory => create_dir(&path, record.mode),
            EntryKind::Regular => write_file(&path, record.mode, entry),
            EntryKind::HardLink => self.hard_link(&path, &record),
            EntryKind::Symlink => self.symlink(&name, &path, &record),
            EntryKind::CharDevice | EntryKind::BlockDevice => self
                .platform
                .device(&path, record.kind, record.mode, record.dev_major, record.dev_minor)
                .map_err(Error::from),
        };
        if let Err(e) = built {
            return self.fail(path, e);
        }

        self.summary.extracted += 1;

        match record.kind {
            // Owner and times would land on the link target
            EntryKind::Symlink => Ok(()),
            EntryKind::Directory => {
                self.verified.insert(path.clone());
                self.pending_dirs.push((path, record));
                Ok(())
            }
            _ => self.apply_metadata(&path, &record, false),
        }
    }

    fn hard_link(&self, path: &Path, record: &Entry) -> Result<()> {
        let target = record
            .link_target
            .as_deref()
            .ok_or_else(|| Error::InvalidPath("hard link without target".to_string()))?;
        let original = self.root.join(normalize_name(target)?);
        if let Some(parent) = original.parent() {
            ensure_inside(&self.canonical_root, parent)?;
        }
        self.platform.hard_link(&original, path)?;
        Ok(())
    }

    fn symlink(&mut self, name: &Path, path: &Path, record: &Entry) -> Result<()> {
        let target = record
            .link_target
            .as_deref()
            .ok_or_else(|| Error::InvalidPath("symlink without target".to_string()))?;
        // Only a target that really resolves inside the root may be copied
        let resolved = resolve_link_target(&self.root, name, target).filter(|resolved| {
            resolved
                .canonicalize()
                .is_ok_and(|canonical| canonical.starts_with(&self.canonical_root))
        });
        self.platform.symlink(target, resolved.as_deref(), path)?;
        // A parent could now be reached through this link
        self.verified.clear();
        Ok(())
    }

    /// Walk the parent of `name` down from the root one component at a
    /// time. Missing directories are created with the destination root's
    /// permissions; an existing symlink on the way must resolve to a
    /// directory inside the root.
    fn prepare_parent(&mut self, name: &Path) -> Result<()> {
        let Some(parent) = name.parent() else {
            return Ok(());
        };

        let mut current = self.root.clone();
        for component in parent.components() {
            current.push(component);
            if self.verified.contains(&current) {
                continue;
            }

            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.is_dir() => {}
                Ok(meta) if meta.file_type().is_symlink() => {
                    ensure_inside(&self.canonical_root, &current)?;
                    if !current.is_dir() {
                        return Err(Error::InvalidPath(format!(
                            "{:?} does not lead to a directory",
                            current
                        )));
                    }
                }
                Ok(_) => {
                    return Err(Error::InvalidPath(format!(
                        "{:?} is not a directory",
                        current
                    )))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let mut builder = DirBuilder::new();
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::DirBuilderExt;
                        builder.mode(self.root_mode);
                    }
                    builder.create(&current)?;
                    debug!(path = ?current, "Created parent directory");
                }
                Err(e) => return Err(e.into()),
            }
            self.verified.insert(current.clone());
        }
        Ok(())
    }

    /// Restore mode, owner and times; `is_dir` entries get their exact mode
    /// here since it was widened at creation
    fn apply_metadata(&mut self, path: &Path, record: &Entry, is_dir: bool) -> Result<()> {
        let mut problems = Vec::new();

        if is_dir {
            if let Err(e) = set_mode(path, record.mode) {
                problems.push(format!("setting mode: {}", e));
            }
        }
        if self.opts.restore_owner {
            if let Err(e) = self.platform.set_owner(path, record.uid, record.gid) {
                problems.push(format!("setting owner: {}", e));
            }
        }
        if self.opts.restore_timestamps {
            if let Err(e) = filetime::set_file_times(path, record.atime, record.mtime) {
                problems.push(format!("setting times: {}", e));
            }
        }

        if problems.is_empty() {
            return Ok(());
        }
        let err = Error::Metadata(problems).at(path);
        if self.opts.fail_fast {
            return Err(err);
        }
        self.report(err);
        Ok(())
    }

    fn finish(mut self) -> Result<ExtractSummary> {
        // Children were written after their directory, deepest come last
        let pending = std::mem::take(&mut self.pending_dirs);
        for (path, record) in pending.iter().rev() {
            self.apply_metadata(path, record, true)?;
        }
        Ok(self.summary)
    }

    fn skip(&mut self, path: PathBuf) {
        info!("Destination exists, skipping: {}", path.display());
        self.summary.skipped.push(path);
    }

    /// Record a per-entry failure, or return it under fail-fast
    fn fail(&mut self, path: PathBuf, err: Error) -> Result<()> {
        let err = err.at(path);
        self.summary.failed += 1;
        if self.opts.fail_fast {
            return Err(err);
        }
        self.report(err);
        Ok(())
    }

    fn report(&mut self, err: Error) {
        warn!("{}", err);
        if let Some(log) = self.opts.error_log.as_mut() {
            if let Err(e) = writeln!(log, "{}", err) {
                debug!(error = %e, "Writing error log failed");
            }
        }
        self.opts.errors.push(err);
    }
}

/// Directories are created owner-writable so their children can be written;
/// the recorded mode is applied afterwards
fn create_dir(path: &Path, mode: u32) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode((mode & 0o7777) | 0o700);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)?;
    Ok(())
}

fn write_file<R: Read>(path: &Path, mode: u32, data: &mut R) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode & 0o7777);
    }
    let mut file = options.open(path)?;
    io::copy(data, &mut file)?;
    drop(file);
    // The creation mode is filtered by the umask
    set_mode(path, mode)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
fn dir_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn dir_mode(_meta: &Metadata) -> u32 {
    0o755
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive_of(root: &Path) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut archive = Archive::tar().with_writer(&mut buf);
            archive.archive_path([root]).unwrap();
            archive.close().unwrap();
        }
        buf
    }

    #[test]
    fn test_destination_checks() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        let mut archive = Archive::tar().with_reader(io::empty());
        let mut opts = ExtractOptions::default();
        assert!(matches!(
            archive.extract(temp_dir.path().join("missing"), &mut opts),
            Err(Error::DestinationMissing(_))
        ));
        assert!(matches!(
            archive.extract(&file, &mut opts),
            Err(Error::DestinationNotDirectory(_))
        ));
        // Not closed by a rejected destination
        assert!(!archive.is_closed());
    }

    #[test]
    fn test_handle_closed_after_extract() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"a").unwrap();
        let buf = archive_of(src.path());

        let dest = TempDir::new().unwrap();
        let mut archive = Archive::tar().with_reader(buf.as_slice());
        let summary = archive
            .extract(dest.path(), &mut ExtractOptions::default())
            .unwrap();
        assert_eq!(summary.extracted, 2);
        assert!(archive.is_closed());
        assert!(matches!(archive.close(), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_existing_directory_is_merged() {
        let src = TempDir::new().unwrap();
        let tree = src.path().join("tree");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("new.txt"), b"new").unwrap();
        let buf = archive_of(&tree);

        let dest = TempDir::new().unwrap();
        fs::create_dir(dest.path().join("tree")).unwrap();
        fs::write(dest.path().join("tree/keep.txt"), b"keep").unwrap();

        let mut archive = Archive::tar().with_reader(buf.as_slice());
        archive
            .extract(dest.path(), &mut ExtractOptions::default())
            .unwrap();
        assert_eq!(fs::read(dest.path().join("tree/keep.txt")).unwrap(), b"keep");
        assert_eq!(fs::read(dest.path().join("tree/new.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_errors_written_to_error_log() {
        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Fifo);
            header.set_size(0);
            header.set_mode(0o644);
            builder.append_data(&mut header, "pipe", io::empty()).unwrap();
            builder.finish().unwrap();
        }

        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        struct Shared(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let dest = TempDir::new().unwrap();
        let mut opts = ExtractOptions {
            error_log: Some(Box::new(Shared(log.clone()))),
            ..Default::default()
        };
        let mut archive = Archive::tar().with_reader(buf.as_slice());
        let summary = archive.extract(dest.path(), &mut opts).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(opts.errors.len(), 1);
        assert!(matches!(
            opts.errors[0].root_cause(),
            Error::UnsupportedEntryType(_)
        ));
        let written = String::from_utf8(log.borrow().clone()).unwrap();
        assert!(written.contains("pipe"));
        assert!(written.contains("Unsupported entry type"));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_directory_restored_last() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let locked = src.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("inside.txt"), b"data").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
        let buf = archive_of(&locked);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let dest = TempDir::new().unwrap();
        let mut archive = Archive::tar().with_reader(buf.as_slice());
        let mut opts = ExtractOptions::default();
        archive.extract(dest.path(), &mut opts).unwrap();
        assert!(opts.errors.is_empty(), "{:?}", opts.errors);

        let out = dest.path().join("locked");
        assert_eq!(fs::read(out.join("inside.txt")).unwrap(), b"data");
        let mode = fs::metadata(&out).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o555);
        fs::set_permissions(&out, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
