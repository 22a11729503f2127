// ─── Guarded filesystem moves ───
// Every recursive copy/move used by migration goes through these helpers.
// The overlap check runs before the first write, never as recovery.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

/// Outcome of the overlap check between a source and a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyGuard {
    Allowed,
    SamePath,
    DestinationInsideSource,
    SourceInsideDestination,
}

/// Absolute, `..`-free form of `path`. The deepest existing ancestor is
/// resolved through the filesystem so symlinked prefixes compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut suffix = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(existing) {
            let mut resolved = strip_verbatim(canonical);
            for part in suffix.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

/// Case-folded key used to compare paths across case-insensitive volumes.
pub fn comparison_key(path: &Path) -> PathBuf {
    PathBuf::from(
        normalize_path(path)
            .to_string_lossy()
            .replace('\\', "/")
            .to_lowercase(),
    )
}

pub fn same_path(a: &Path, b: &Path) -> bool {
    comparison_key(a) == comparison_key(b)
}

pub fn check_copy(source: &Path, destination: &Path) -> CopyGuard {
    let source = comparison_key(source);
    let destination = comparison_key(destination);

    if source == destination {
        CopyGuard::SamePath
    } else if destination.starts_with(&source) {
        CopyGuard::DestinationInsideSource
    } else if source.starts_with(&destination) {
        CopyGuard::SourceInsideDestination
    } else {
        CopyGuard::Allowed
    }
}

/// Recursively copy `source` into `destination`.
///
/// Returns `Ok(false)` without touching anything when the paths overlap.
/// Files already present at the destination are kept, so re-running a copy
/// never duplicates or clobbers data.
pub fn safe_copy_dir(source: &Path, destination: &Path) -> LauncherResult<bool> {
    let guard = check_copy(source, destination);
    if guard != CopyGuard::Allowed {
        warn!(
            "Skipping copy {:?} -> {:?}: {:?}",
            source, destination, guard
        );
        return Ok(false);
    }
    if !source.is_dir() {
        return Ok(false);
    }

    copy_dir_recursive(source, destination)?;
    Ok(true)
}

/// Move every entry of `source` into `destination`, merging directories.
///
/// Uses `rename` and falls back to copy + delete across volumes. Entries
/// whose destination already exists are left in place. Returns `Ok(false)`
/// when the paths overlap.
pub fn safe_move_dir_contents(source: &Path, destination: &Path) -> LauncherResult<bool> {
    let guard = check_copy(source, destination);
    if guard != CopyGuard::Allowed {
        warn!(
            "Skipping move {:?} -> {:?}: {:?}",
            source, destination, guard
        );
        return Ok(false);
    }
    if !source.is_dir() {
        return Ok(false);
    }

    move_dir_contents(source, destination)?;
    Ok(true)
}

/// Remove `path` only if it is an empty directory.
pub fn remove_dir_if_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none() && std::fs::remove_dir(path).is_ok(),
        Err(_) => false,
    }
}

pub fn dir_is_non_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> LauncherResult<()> {
    std::fs::create_dir_all(destination)
        .map_err(|source_err| LauncherError::io(destination, source_err))?;

    for entry in
        std::fs::read_dir(source).map_err(|source_err| LauncherError::io(source, source_err))?
    {
        let entry = entry.map_err(|source_err| LauncherError::io(source, source_err))?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|source_err| LauncherError::io(&src_path, source_err))?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            if dst_path.exists() {
                debug!("Keeping existing {:?}", dst_path);
                continue;
            }
            std::fs::copy(&src_path, &dst_path)
                .map_err(|source_err| LauncherError::io(&dst_path, source_err))?;
        }
    }

    Ok(())
}

fn move_dir_contents(source: &Path, destination: &Path) -> LauncherResult<()> {
    std::fs::create_dir_all(destination)
        .map_err(|source_err| LauncherError::io(destination, source_err))?;

    for entry in
        std::fs::read_dir(source).map_err(|source_err| LauncherError::io(source, source_err))?
    {
        let entry = entry.map_err(|source_err| LauncherError::io(source, source_err))?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|source_err| LauncherError::io(&src_path, source_err))?;

        if dst_path.exists() {
            if file_type.is_dir() && dst_path.is_dir() {
                move_dir_contents(&src_path, &dst_path)?;
                remove_dir_if_empty(&src_path);
            } else {
                debug!("Keeping existing {:?}, leaving {:?}", dst_path, src_path);
            }
            continue;
        }

        if std::fs::rename(&src_path, &dst_path).is_ok() {
            continue;
        }

        // Cross-volume: copy first, delete the source only once the copy
        // completed.
        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            std::fs::remove_dir_all(&src_path)
                .map_err(|source_err| LauncherError::io(&src_path, source_err))?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path)
                .map_err(|source_err| LauncherError::io(&dst_path, source_err))?;
            std::fs::remove_file(&src_path)
                .map_err(|source_err| LauncherError::io(&src_path, source_err))?;
        }
    }

    Ok(())
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_prefix(r"\\?\") {
        Some(stripped) if !stripped.starts_with("UNC") => PathBuf::from(stripped),
        _ => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn file_count(root: &Path) -> usize {
        let mut count = 0;
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap().flatten() {
                if entry.file_type().unwrap().is_dir() {
                    stack.push(entry.path());
                } else {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn overlapping_copies_are_no_ops() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("parent");
        let child = parent.join("child");
        write(&child.join("a.txt"), "a");

        assert!(!safe_copy_dir(&parent, &parent).unwrap());
        assert!(!safe_copy_dir(&parent, &child).unwrap());
        assert!(!safe_copy_dir(&child, &parent).unwrap());
        assert_eq!(file_count(&parent), 1);
    }

    #[test]
    fn overlap_detection_ignores_dot_segments_and_case() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("Data");
        std::fs::create_dir_all(&dir).unwrap();

        let dotted = dir.join("sub").join("..");
        assert_eq!(check_copy(&dir, &dotted), CopyGuard::SamePath);

        let nested_upper = tmp.path().join("DATA").join("inner");
        assert_eq!(
            check_copy(&dir, &nested_upper),
            CopyGuard::DestinationInsideSource
        );
    }

    #[test]
    fn sibling_prefix_is_not_treated_as_nesting() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("game");
        let b = tmp.path().join("game-backup");
        assert_eq!(check_copy(&a, &b), CopyGuard::Allowed);
    }

    #[test]
    fn copy_keeps_existing_destination_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("Client/app.bin"), "new");
        write(&dst.join("Client/app.bin"), "old");
        write(&src.join("UserData/save.dat"), "save");

        assert!(safe_copy_dir(&src, &dst).unwrap());
        assert_eq!(
            std::fs::read_to_string(dst.join("Client/app.bin")).unwrap(),
            "old"
        );
        assert!(dst.join("UserData/save.dat").exists());
        assert!(src.join("UserData/save.dat").exists());
    }

    #[test]
    fn move_merges_directories_and_empties_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("UserData/a.txt"), "a");
        write(&dst.join("UserData/b.txt"), "b");

        assert!(safe_move_dir_contents(&src, &dst).unwrap());
        assert!(dst.join("UserData/a.txt").exists());
        assert!(dst.join("UserData/b.txt").exists());
        assert!(remove_dir_if_empty(&src));
    }

    #[test]
    fn remove_dir_if_empty_keeps_populated_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("full/x"), "x");
        assert!(!remove_dir_if_empty(&tmp.path().join("full")));
        assert!(tmp.path().join("full/x").exists());
    }
}
