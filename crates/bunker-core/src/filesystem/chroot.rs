//! Rooting a process into a container snapshot.
//!
//! Uses `chroot(2)` inside a private mount namespace; the snapshot directory
//! becomes `/` and the working directory is reset to it.

use std::path::Path;

use bunker_common::error::{BunkerError, Result};

/// Directories a snapshot must contain before a process can be rooted in it.
pub const SUPPORT_DIRS: [&str; 3] = ["proc", "etc", "dev"];

/// Creates the mount points and config directories the stages rely on.
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub fn prepare_rootfs(rootfs: &Path) -> Result<()> {
    for dir in SUPPORT_DIRS {
        let path = rootfs.join(dir);
        std::fs::create_dir_all(&path).map_err(|e| BunkerError::io(path, e))?;
    }
    tracing::debug!(rootfs = %rootfs.display(), "rootfs prepared");
    Ok(())
}

/// Switches the calling process's root to `rootfs` and changes into it.
///
/// # Errors
///
/// Returns `BunkerError::Namespace` if `chroot(2)` or `chdir(2)` fails.
pub fn enter_root(rootfs: &Path) -> Result<()> {
    nix::unistd::chroot(rootfs).map_err(|e| {
        BunkerError::namespace(format!("chroot into {} failed: {e}", rootfs.display()))
    })?;
    nix::unistd::chdir("/")
        .map_err(|e| BunkerError::namespace(format!("chdir / after chroot failed: {e}")))?;
    tracing::info!(rootfs = %rootfs.display(), "entered container root");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_support_dirs() {
        let dir = tempfile::tempdir().unwrap();
        prepare_rootfs(dir.path()).unwrap();
        for sub in SUPPORT_DIRS {
            assert!(dir.path().join(sub).is_dir(), "{sub} missing");
        }
    }

    #[test]
    fn prepare_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/hostname"), "box").unwrap();
        prepare_rootfs(dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/hostname")).unwrap(),
            "box"
        );
    }
}
