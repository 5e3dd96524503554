//! CPU resource control via the cgroup v1 `cpu` controller.

use std::path::Path;

use bunker_common::error::{BunkerError, Result};

/// Sets the relative CPU weight (`cpu.shares`) for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `cpu.shares` fails.
pub fn set_cpu_shares(cgroup_path: &Path, shares: u64) -> Result<()> {
    let file = cgroup_path.join("cpu.shares");
    std::fs::write(&file, shares.to_string()).map_err(|e| BunkerError::Resource {
        path: file,
        message: format!("cannot set cpu shares: {e}"),
    })?;
    tracing::debug!(shares, "CPU shares set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_shares_file() {
        let dir = tempfile::tempdir().unwrap();
        set_cpu_shares(dir.path(), 512).unwrap();
        let written = std::fs::read_to_string(dir.path().join("cpu.shares")).unwrap();
        assert_eq!(written, "512");
    }

    #[test]
    fn missing_group_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = set_cpu_shares(&dir.path().join("gone"), 1).unwrap_err();
        assert!(matches!(err, BunkerError::Resource { .. }));
    }
}
