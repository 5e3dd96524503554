//! Mount utilities for container filesystem setup.

use std::path::Path;

use bunker_common::error::{BunkerError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};

/// Marks every mount in the current mount namespace private.
///
/// Called right after entering a fresh mount namespace so that mounts made
/// inside the container never propagate back to the host.
///
/// # Errors
///
/// Returns `BunkerError::Namespace` if the remount fails.
pub fn make_mounts_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| BunkerError::namespace(format!("cannot make mounts private: {e}")))?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}

/// Mounts a fresh procfs at `target`.
///
/// Returns the raw errno so it can be called between `fork` and `exec`.
///
/// # Errors
///
/// Returns the `mount(2)` errno on failure.
pub fn mount_proc(target: &Path) -> nix::Result<()> {
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
}

/// Lazily unmounts the procfs at `target`.
///
/// # Errors
///
/// Returns `BunkerError::Namespace` if `umount2(2)` fails.
pub fn unmount_proc(target: &Path) -> Result<()> {
    umount2(target, MntFlags::MNT_DETACH).map_err(|e| {
        BunkerError::namespace(format!("cannot unmount {}: {e}", target.display()))
    })?;
    tracing::debug!(target = %target.display(), "procfs unmounted");
    Ok(())
}
