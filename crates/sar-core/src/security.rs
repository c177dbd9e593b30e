//! Path checks keeping extraction inside its destination

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::error;

/// Normalize an untrusted archive name into a path relative to the destination.
///
/// Leading `/`, drive prefixes and `.` parts are dropped and inner `..` parts
/// are resolved lexically. A name whose `..` parts climb above the root is
/// rejected. The result may be empty (for names like `./`).
pub fn normalize_name(untrusted: &Path) -> Result<PathBuf> {
    let mut result = PathBuf::new();

    for component in untrusted.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    error!(path = ?untrusted, "Entry name escapes the destination");
                    return Err(Error::InvalidPath(format!(
                        "Path traversal attempt detected: {:?}",
                        untrusted
                    )));
                }
            }
            Component::Normal(name) => result.push(name),
        }
    }

    Ok(result)
}

/// Resolve a symlink's text against the directory holding the link.
///
/// `link` is the link's normalized path relative to `root`. Returns the
/// absolute location under `root`, or `None` if the target is absolute or
/// climbs out of `root`.
pub fn resolve_link_target(root: &Path, link: &Path, target: &Path) -> Option<PathBuf> {
    if target.is_absolute() {
        return None;
    }

    let mut normalized: PathBuf = link.parent().map(Path::to_path_buf).unwrap_or_default();
    for component in target.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::Normal(name) => normalized.push(name),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => return None,
        }
    }

    Some(root.join(normalized))
}

/// Verify that an existing directory still lies inside the canonical root.
///
/// Catches names routed through a symlink extracted earlier in the same run.
pub fn ensure_inside(canonical_root: &Path, dir: &Path) -> Result<()> {
    let canonical = dir
        .canonicalize()
        .map_err(|e| Error::InvalidPath(format!("Cannot canonicalize {:?}: {}", dir, e)))?;

    if !canonical.starts_with(canonical_root) {
        error!(root = ?canonical_root, path = ?dir, resolved = ?canonical, "Path escapes destination");
        return Err(Error::InvalidPath(format!(
            "Path would escape extraction directory: {:?}",
            dir
        )));
    }
    Ok(())
}
