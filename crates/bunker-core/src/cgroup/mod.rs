//! Cgroup v1 resource management.
//!
//! Each container gets one group per controller, at
//! `<root>/<controller>/<parent>/<container id>`. The `cpu` and `memory`
//! controllers carry the limits; the `pids` controller answers membership
//! queries. Groups are created by the first stage, joined by the second, and
//! deleted by the `run` invocation once everything inside has exited.

pub mod cpu;
pub mod memory;
pub mod pids;

use std::path::{Path, PathBuf};

use bunker_common::config::BunkerConfig;
use bunker_common::error::{BunkerError, Result};
use bunker_common::types::ResourceLimits;

/// A cgroup v1 controller bunker places containers under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    /// CPU weight.
    Cpu,
    /// Memory ceiling.
    Memory,
    /// Membership queries.
    Pids,
}

impl Controller {
    /// Every controller a container group spans.
    pub const ALL: [Self; 3] = [Self::Cpu, Self::Memory, Self::Pids];

    /// Directory name of the controller's hierarchy.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Pids => "pids",
        }
    }
}

/// The part of the cgroup hierarchy bunker manages.
#[derive(Debug, Clone)]
pub struct CgroupTree {
    root: PathBuf,
    parent: String,
}

impl CgroupTree {
    /// Creates a tree rooted at `root` (normally `/sys/fs/cgroup`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, parent: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            parent: parent.into(),
        }
    }

    /// Builds the tree described by the runtime configuration.
    #[must_use]
    pub fn from_config(config: &BunkerConfig) -> Self {
        Self::new(&config.cgroup_root, &config.cgroup_parent)
    }

    fn handle(&self, container_id: &str) -> CgroupHandle {
        CgroupHandle {
            root: self.root.clone(),
            group: Path::new(&self.parent).join(container_id),
        }
    }

    /// Creates a new group for `container_id` and applies `limits`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Resource` if a controller directory cannot be
    /// created or a limit cannot be written.
    pub fn create(&self, container_id: &str, limits: &ResourceLimits) -> Result<CgroupHandle> {
        let handle = self.handle(container_id);
        for controller in Controller::ALL {
            let path = handle.path(controller);
            std::fs::create_dir_all(&path).map_err(|e| BunkerError::Resource {
                path: path.clone(),
                message: format!("cannot create group: {e}"),
            })?;
        }
        cpu::set_cpu_shares(&handle.path(Controller::Cpu), limits.cpu_shares)?;
        memory::set_memory_limit(&handle.path(Controller::Memory), limits.memory_bytes)?;
        tracing::info!(id = container_id, ?limits, "cgroup created");
        Ok(handle)
    }

    /// Reattaches to the existing group for `container_id`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::NotFound` if any controller directory is missing.
    pub fn load(&self, container_id: &str) -> Result<CgroupHandle> {
        let handle = self.handle(container_id);
        if Controller::ALL.iter().all(|c| handle.path(*c).is_dir()) {
            Ok(handle)
        } else {
            Err(BunkerError::NotFound {
                kind: "cgroup",
                id: container_id.to_string(),
            })
        }
    }
}

/// Handle to one container's group across all controllers.
#[derive(Debug, Clone)]
pub struct CgroupHandle {
    root: PathBuf,
    group: PathBuf,
}

impl CgroupHandle {
    /// Directory of this group under `controller`.
    #[must_use]
    pub fn path(&self, controller: Controller) -> PathBuf {
        self.root.join(controller.name()).join(&self.group)
    }

    /// Adds `pid` to the group under every controller.
    ///
    /// # Errors
    ///
    /// Returns an error if writing any `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        for controller in Controller::ALL {
            pids::add_process(&self.path(controller), pid)?;
        }
        Ok(())
    }

    /// Adds the calling process to the group.
    ///
    /// # Errors
    ///
    /// Returns an error if writing any `cgroup.procs` fails.
    pub fn attach_self(&self) -> Result<()> {
        self.add_process(std::process::id())
    }

    /// Lists member processes as seen by the `pids` controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the member list cannot be read.
    pub fn processes(&self) -> Result<Vec<u32>> {
        pids::list_processes(&self.path(Controller::Pids))
    }

    /// Removes the group from every controller.
    ///
    /// The kernel refuses while member processes remain; that is reported,
    /// not retried. Every controller is attempted and the first failure wins.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Resource` if any controller directory cannot be removed.
    pub fn delete(&self) -> Result<()> {
        let mut first_error = None;
        for controller in Controller::ALL {
            let path = self.path(controller);
            if !path.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_dir(&path) {
                tracing::warn!(path = %path.display(), error = %e, "cgroup removal failed");
                let _ = first_error.get_or_insert(BunkerError::Resource {
                    path,
                    message: format!("cannot delete group (members still alive?): {e}"),
                });
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::info!(group = %self.group.display(), "cgroup deleted");
                Ok(())
            }
        }
    }
}
