//! Group membership through `cgroup.procs`.
//!
//! Membership is queried under the `pids` controller; every controller
//! directory carries its own `cgroup.procs`, so attaching writes to each.

use std::path::Path;

use bunker_common::error::{BunkerError, Result};

/// Moves `pid` into the cgroup at `cgroup_path`.
///
/// # Errors
///
/// Returns an error if writing to `cgroup.procs` fails.
pub fn add_process(cgroup_path: &Path, pid: u32) -> Result<()> {
    let procs = cgroup_path.join("cgroup.procs");
    std::fs::write(&procs, pid.to_string()).map_err(|e| BunkerError::Resource {
        path: procs,
        message: format!("cannot attach pid {pid}: {e}"),
    })?;
    tracing::debug!(pid, path = %cgroup_path.display(), "added process to cgroup");
    Ok(())
}

/// Lists the member process IDs of the cgroup at `cgroup_path`.
///
/// # Errors
///
/// Returns an error if `cgroup.procs` cannot be read or holds a non-numeric line.
pub fn list_processes(cgroup_path: &Path) -> Result<Vec<u32>> {
    let procs = cgroup_path.join("cgroup.procs");
    let content = std::fs::read_to_string(&procs).map_err(|e| BunkerError::Resource {
        path: procs.clone(),
        message: format!("cannot read members: {e}"),
    })?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u32>().map_err(|e| BunkerError::Resource {
                path: procs.clone(),
                message: format!("bad pid {line:?}: {e}"),
            })
        })
        .collect()
}
