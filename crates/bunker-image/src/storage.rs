//! Snapshot store backends.
//!
//! Every image and container lives in its own subvolume directly under the
//! store root. The [`SubvolumeStore`] trait is the seam the registry talks to;
//! [`BtrfsStore`] gives real copy-on-write snapshots, [`DirStore`] falls back
//! to plain directories and full copies on hosts without btrfs.

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use bunker_common::error::{BunkerError, Result};

/// Inode number of the root directory of every btrfs subvolume.
const BTRFS_SUBVOLUME_INODE: u64 = 256;

/// Primitive operations on the subvolumes of a snapshot store.
///
/// Paths passed in are absolute paths directly under [`SubvolumeStore::root`].
pub trait SubvolumeStore: fmt::Debug {
    /// Directory holding every subvolume.
    fn root(&self) -> &Path;

    /// Creates an empty subvolume at `path`; fails if anything already exists there.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Storage` if the subvolume cannot be created.
    fn create(&self, path: &Path) -> Result<()>;

    /// Creates `target` as an independent copy of the subvolume `source`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Storage` if the snapshot cannot be taken.
    fn snapshot(&self, source: &Path, target: &Path) -> Result<()>;

    /// Deletes the subvolume at `path` with everything in it.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Storage` if the subvolume cannot be deleted.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Whether `path` is a subvolume of this store.
    fn is_subvolume(&self, path: &Path) -> bool;
}

/// Store backed by btrfs subvolumes, driven through the `btrfs` tool.
#[derive(Debug)]
pub struct BtrfsStore {
    root: PathBuf,
    tool: PathBuf,
}

impl BtrfsStore {
    /// Opens a btrfs store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Storage` if `root` is not on btrfs or the
    /// `btrfs` tool is not installed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !is_on_btrfs(&root) {
            return Err(BunkerError::Storage {
                path: root,
                message: "not a btrfs filesystem".into(),
            });
        }
        let tool = which::which("btrfs").map_err(|e| BunkerError::Storage {
            path: root.clone(),
            message: format!("btrfs tool not found: {e}"),
        })?;
        tracing::debug!(root = %root.display(), tool = %tool.display(), "btrfs store opened");
        Ok(Self { root, tool })
    }

    fn subvolume(&self, path: &Path, args: &[&Path]) -> Result<()> {
        let output = Command::new(&self.tool)
            .arg("subvolume")
            .args(args)
            .output()
            .map_err(|e| BunkerError::Execution {
                command: self.tool.display().to_string(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(BunkerError::Storage {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl SubvolumeStore for BtrfsStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn create(&self, path: &Path) -> Result<()> {
        self.subvolume(path, &[Path::new("create"), path])?;
        tracing::debug!(path = %path.display(), "subvolume created");
        Ok(())
    }

    fn snapshot(&self, source: &Path, target: &Path) -> Result<()> {
        self.subvolume(target, &[Path::new("snapshot"), source, target])?;
        tracing::debug!(source = %source.display(), target = %target.display(), "subvolume snapshotted");
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.subvolume(path, &[Path::new("delete"), path])?;
        tracing::debug!(path = %path.display(), "subvolume deleted");
        Ok(())
    }

    fn is_subvolume(&self, path: &Path) -> bool {
        is_on_btrfs(path)
            && std::fs::symlink_metadata(path)
                .is_ok_and(|m| m.is_dir() && m.ino() == BTRFS_SUBVOLUME_INODE)
    }
}

fn is_on_btrfs(path: &Path) -> bool {
    nix::sys::statfs::statfs(path)
        .is_ok_and(|fs| fs.filesystem_type() == nix::sys::statfs::BTRFS_SUPER_MAGIC)
}

/// Store of plain directories; snapshots are full recursive copies.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens a directory store at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| BunkerError::io(&root, e))?;
        tracing::debug!(root = %root.display(), "directory store opened");
        Ok(Self { root })
    }
}

impl SubvolumeStore for DirStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn create(&self, path: &Path) -> Result<()> {
        std::fs::create_dir(path).map_err(|e| BunkerError::Storage {
            path: path.to_path_buf(),
            message: format!("cannot create: {e}"),
        })
    }

    fn snapshot(&self, source: &Path, target: &Path) -> Result<()> {
        if !self.is_subvolume(source) {
            return Err(BunkerError::Storage {
                path: source.to_path_buf(),
                message: "snapshot source does not exist".into(),
            });
        }
        self.create(target)?;
        copy_tree(source, target)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path).map_err(|e| BunkerError::Storage {
            path: path.to_path_buf(),
            message: format!("cannot delete: {e}"),
        })
    }

    fn is_subvolume(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
    }
}

/// Opens the best store available at `root`: btrfs when possible, else directories.
///
/// # Errors
///
/// Returns an error if neither store can be opened.
pub fn open_store(root: &Path) -> Result<Box<dyn SubvolumeStore>> {
    match BtrfsStore::open(root) {
        Ok(store) => Ok(Box::new(store)),
        Err(e) => {
            tracing::debug!(error = %e, "falling back to directory store");
            Ok(Box::new(DirStore::open(root)?))
        }
    }
}

/// Recursively copies the contents of `source` into the existing directory `target`.
///
/// Directories, regular files, and symlinks are copied with their permission
/// bits; other file types are skipped.
///
/// # Errors
///
/// Returns an error if any entry cannot be read or written.
pub fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    let entries = std::fs::read_dir(source).map_err(|e| BunkerError::io(source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BunkerError::io(source, e))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let meta = std::fs::symlink_metadata(&from).map_err(|e| BunkerError::io(&from, e))?;
        let kind = meta.file_type();
        if kind.is_symlink() {
            let link = std::fs::read_link(&from).map_err(|e| BunkerError::io(&from, e))?;
            std::os::unix::fs::symlink(&link, &to).map_err(|e| BunkerError::io(&to, e))?;
        } else if kind.is_dir() {
            std::fs::create_dir(&to).map_err(|e| BunkerError::io(&to, e))?;
            copy_tree(&from, &to)?;
            std::fs::set_permissions(&to, meta.permissions())
                .map_err(|e| BunkerError::io(&to, e))?;
        } else if kind.is_file() {
            let _ = std::fs::copy(&from, &to).map_err(|e| BunkerError::io(&to, e))?;
        } else {
            tracing::debug!(path = %from.display(), "skipping special file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn dir_store_create_refuses_existing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("open");
        let path = dir.path().join("image_a");
        store.create(&path).expect("create");
        assert!(store.is_subvolume(&path));
        assert!(matches!(
            store.create(&path),
            Err(BunkerError::Storage { .. })
        ));
    }

    #[test]
    fn dir_store_snapshot_is_independent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("open");
        let image = dir.path().join("image_a");
        let container = dir.path().join("process_b");
        store.create(&image).expect("create");
        std::fs::write(image.join("hello.txt"), "hi").expect("write");

        store.snapshot(&image, &container).expect("snapshot");
        std::fs::write(container.join("hello.txt"), "changed").expect("write");
        std::fs::write(container.join("new.txt"), "x").expect("write");

        assert_eq!(std::fs::read_to_string(image.join("hello.txt")).expect("read"), "hi");
        assert!(!image.join("new.txt").exists());
    }

    #[test]
    fn dir_store_snapshot_of_missing_source_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("open");
        let err = store
            .snapshot(&dir.path().join("image_x"), &dir.path().join("process_y"))
            .unwrap_err();
        assert!(matches!(err, BunkerError::Storage { .. }));
        assert!(!dir.path().join("process_y").exists());
    }

    #[test]
    fn dir_store_delete_removes_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("open");
        let path = dir.path().join("image_c");
        store.create(&path).expect("create");
        std::fs::create_dir_all(path.join("a/b")).expect("mkdir");
        store.delete(&path).expect("delete");
        assert!(!store.is_subvolume(&path));
    }

    #[test]
    fn copy_tree_keeps_symlinks_and_modes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("src");
        let target = dir.path().join("dst");
        std::fs::create_dir_all(source.join("bin")).expect("mkdir");
        std::fs::write(source.join("bin/tool"), "#!/bin/sh\n").expect("write");
        std::fs::set_permissions(source.join("bin/tool"), std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        std::os::unix::fs::symlink("bin/tool", source.join("tool")).expect("symlink");
        std::fs::create_dir(&target).expect("mkdir");

        copy_tree(&source, &target).expect("copy");

        let mode = std::fs::metadata(target.join("bin/tool")).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            std::fs::read_link(target.join("tool")).expect("readlink"),
            Path::new("bin/tool")
        );
    }

    #[test]
    fn open_store_falls_back_off_btrfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("store");
        let store = open_store(&root).expect("open");
        assert_eq!(store.root(), root);
        assert!(root.is_dir());
    }
}
