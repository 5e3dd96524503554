//! Memory resource control via the cgroup v1 `memory` controller.

use std::path::Path;

use bunker_common::error::{BunkerError, Result};

/// Sets the hard memory ceiling (`memory.limit_in_bytes`) for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.limit_in_bytes` fails.
pub fn set_memory_limit(cgroup_path: &Path, bytes: u64) -> Result<()> {
    let file = cgroup_path.join("memory.limit_in_bytes");
    std::fs::write(&file, bytes.to_string()).map_err(|e| BunkerError::Resource {
        path: file,
        message: format!("cannot set memory limit: {e}"),
    })?;
    tracing::debug!(bytes, "memory limit set");
    Ok(())
}
