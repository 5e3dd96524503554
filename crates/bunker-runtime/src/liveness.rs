//! Container liveness, read from control-group membership.
//!
//! A container is alive while its group exists and has at least one member.
//! Nothing is cached: every query reads the pids controller again.

use bunker_common::types::{ContainerStatus, Identifier};
use bunker_core::cgroup::{CgroupHandle, CgroupTree};

/// Result of probing one container.
#[derive(Debug, Clone)]
pub struct Liveness {
    /// The container's group, if it exists.
    pub group: Option<CgroupHandle>,
    /// Member process IDs; empty when the group is missing or unreadable.
    pub processes: Vec<u32>,
}

impl Liveness {
    /// Whether the container has a live member.
    #[must_use]
    pub fn alive(&self) -> bool {
        self.group.is_some() && !self.processes.is_empty()
    }

    /// The `ps` status column.
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        if self.alive() {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        }
    }
}

/// Probes `id` under `tree`.
#[must_use]
pub fn is_alive(tree: &CgroupTree, id: &Identifier) -> Liveness {
    let group = match tree.load(&id.to_string()) {
        Ok(group) => group,
        Err(e) => {
            tracing::debug!(id = %id, error = %e, "no control group");
            return Liveness {
                group: None,
                processes: Vec::new(),
            };
        }
    };
    let processes = group.processes().unwrap_or_else(|e| {
        tracing::debug!(id = %id, error = %e, "control group members unreadable");
        Vec::new()
    });
    Liveness {
        group: Some(group),
        processes,
    }
}
