//! File helpers used by dump, merge, clone and cleanup. Every helper that
//! writes creates missing parents and overwrites the destination.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Move `src` to `dst`. Falls back to copy and remove when a rename is not
/// possible, e.g. across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if src == dst {
        return Ok(());
    }
    ensure_parent(dst)?;
    match std::fs::rename(src, dst) {
        Ok(()) => {}
        Err(e) => {
            debug!(src = %src.display(), dst = %dst.display(), error = %e, "rename failed, copying");
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)?;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), "moved");
    Ok(())
}

/// Copy `src` to `dst`, returning the number of bytes copied.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    if src == dst {
        return Ok(0);
    }
    ensure_parent(dst)?;
    let bytes = std::fs::copy(src, dst)?;
    debug!(src = %src.display(), dst = %dst.display(), bytes, "copied");
    Ok(bytes)
}

/// Remove `path`. Returns `false` when it did not exist.
pub fn remove_file(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "file already removed");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Longest common directory prefix of `paths`' parent directories.
/// Returns an empty path when they share nothing.
pub fn common_base<'a, I>(paths: I) -> PathBuf
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut common: Option<Vec<Component<'a>>> = None;
    for path in paths {
        let parent: Vec<Component<'a>> = path
            .parent()
            .map(|p| p.components().collect())
            .unwrap_or_default();
        common = Some(match common {
            None => parent,
            Some(acc) => acc
                .into_iter()
                .zip(parent)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    common.unwrap_or_default().into_iter().collect()
}
