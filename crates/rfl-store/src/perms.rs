//! Group-shared directory creation and umask scoping.
//!
//! Caches are shared by every member of a trusted group. New directories get
//! `rwxrwsr-x` so files created below them inherit the directory's group, and
//! writes happen under a narrowed umask so group members can replace entries.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::{umask, Mode};
use nix::unistd::{chown, getuid, Gid, Group};
use tracing::warn;

/// Mode for shared cache directories: group rwx plus set-group-id.
pub const SHARED_DIR_MODE: u32 = 0o2775;

/// Umask applied for the duration of a write burst (group-writable).
pub const SHARED_UMASK: u32 = 0o002;

/// Restores the previous umask on drop.
#[derive(Debug)]
pub struct UmaskGuard {
    previous: Mode,
}

impl UmaskGuard {
    pub fn narrow(mask: u32) -> Self {
        let previous = umask(Mode::from_bits_truncate(mask as _));
        Self { previous }
    }

    pub fn shared() -> Self {
        Self::narrow(SHARED_UMASK)
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// Resolve a group name to a gid, warning when the group does not exist.
pub fn resolve_group(name: &str) -> Option<Gid> {
    match Group::from_name(name) {
        Ok(Some(group)) => Some(group.gid),
        Ok(None) | Err(_) => {
            warn!(group = name, "unable to resolve cache group name");
            None
        }
    }
}

/// Create `dir` and any missing parents.
///
/// Every directory created here at or below `root` that is owned by the
/// current user is switched to [`SHARED_DIR_MODE`] and, when `group` is set,
/// handed to that group. Directories created concurrently by another process
/// are left alone.
pub fn create_shared_dirs(root: &Path, dir: &Path, group: Option<Gid>) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut missing: Vec<PathBuf> = Vec::new();
    let mut cursor = Some(dir);
    while let Some(path) = cursor {
        if path.as_os_str().is_empty() || path.exists() {
            break;
        }
        missing.push(path.to_path_buf());
        cursor = path.parent();
    }

    let uid = getuid().as_raw();
    for path in missing.iter().rev() {
        match fs::create_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
        if !path.starts_with(root) {
            continue;
        }
        let meta = fs::metadata(path)?;
        if meta.uid() != uid {
            continue;
        }
        if let Some(gid) = group {
            if let Err(e) = chown(path.as_path(), None, Some(gid)) {
                warn!(path = %path.display(), error = %e, "unable to chgrp cache directory");
            }
        }
        fs::set_permissions(path, fs::Permissions::from_mode(SHARED_DIR_MODE))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_nested_dirs_with_setgid() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("cache");
        let leaf = root.join("repo").join("ab").join("cdef");

        create_shared_dirs(&root, &leaf, None).unwrap();

        for dir in [&root, &root.join("repo"), &root.join("repo/ab"), &leaf] {
            let mode = fs::metadata(dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, SHARED_DIR_MODE, "mode of {:?}", dir);
        }
    }

    #[test]
    fn test_existing_dirs_untouched() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700)).unwrap();

        let leaf = root.join("new");
        create_shared_dirs(&root, &leaf, None).unwrap();

        let root_mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(root_mode & 0o7777, 0o700);
        let leaf_mode = fs::metadata(&leaf).unwrap().permissions().mode();
        assert_eq!(leaf_mode & 0o7777, SHARED_DIR_MODE);
    }

    #[test]
    fn test_parents_above_root_are_created_plain() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("outer").join("cache");

        create_shared_dirs(&root, &root, None).unwrap();

        assert!(root.is_dir());
        let outer_mode = fs::metadata(temp.path().join("outer"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(outer_mode & 0o2000, 0);
        let root_mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(root_mode & 0o7777, SHARED_DIR_MODE);
    }

    #[test]
    fn test_umask_guard_restores() {
        let before = umask(Mode::from_bits_truncate(0o022));
        {
            let _guard = UmaskGuard::shared();
            let inside = umask(Mode::from_bits_truncate(0o002));
            assert_eq!(inside.bits() & 0o777, 0o002);
        }
        let after = umask(before);
        assert_eq!(after.bits() & 0o777, 0o022);
    }
}
