//! Second stage: running one more command inside a live container.
//!
//! The parent re-executes itself as `attach` in a private mount namespace,
//! so the chroot below never touches the host mount table. The attach child
//! borrows the namespaces of a process already inside the container: it
//! enters the network namespace, joins the control group, roots itself in
//! the snapshot, then enters the PID and UTS namespaces before starting the
//! command. Output is not logged; stdio is inherited as is.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;

use bunker_common::config::BunkerConfig;
use bunker_common::error::{BunkerError, Result};
use bunker_common::types::Identifier;
use bunker_core::cgroup::{CgroupHandle, CgroupTree};
use bunker_core::filesystem::{chroot, mount};
use bunker_core::namespace::{self, Namespace, NamespaceFile, pid};
use bunker_image::registry::Registry;
use nix::sched::unshare;

use crate::liveness;
use crate::stage::{self, Stage, StageRequest};

fn not_running(id: &Identifier) -> BunkerError {
    BunkerError::Validation {
        message: format!("container {id} is not running"),
    }
}

fn live_group(config: &BunkerConfig, id: &Identifier) -> Result<(CgroupHandle, Vec<u32>)> {
    let probe = liveness::is_alive(&CgroupTree::from_config(config), id);
    if !probe.alive() {
        return Err(not_running(id));
    }
    let group = probe.group.ok_or_else(|| not_running(id))?;
    Ok((group, probe.processes))
}

/// Runs `command` inside the live container `id` and returns its exit code.
///
/// # Errors
///
/// Returns `BunkerError::Validation` if the command is empty or the
/// container is not running, and an error if the attach child cannot be
/// started.
pub fn join(config: &BunkerConfig, id: &Identifier, command: &[String]) -> Result<i32> {
    let request = StageRequest::new(Stage::Attach, id.clone(), command.to_vec())?;
    let _ = live_group(config, id)?;

    let mut child = stage::self_command(config, &request);
    let _ = child
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let flags = namespace::clone_flags(&[Namespace::Mount]);
    // SAFETY: the hook runs between fork and exec and only issues unshare(2).
    let _ = unsafe { child.pre_exec(move || unshare(flags).map_err(std::io::Error::from)) };

    let status = child
        .spawn()
        .map_err(stage::spawn_error(Stage::Attach.name()))?
        .wait()
        .map_err(stage::spawn_error(Stage::Attach.name()))?;
    let code = stage::exit_code(status);
    tracing::info!(id = %id, code, "exec finished");
    Ok(code)
}

/// Second half of [`join`], running in the re-executed attach child.
///
/// # Errors
///
/// Returns an error if the container stopped meanwhile, any namespace
/// cannot be entered, or the command cannot be started.
pub fn attach(config: &BunkerConfig, registry: &Registry, request: &StageRequest) -> Result<i32> {
    let id = &request.id;
    let (group, members) = live_group(config, id)?;
    let member = pid::member_inside(&members)?;
    tracing::debug!(id = %id, member, "joining container through member");

    // Handles are opened while the host /proc is still reachable.
    let net = NamespaceFile::of_process(member, Namespace::Net)?;
    let pid_ns = NamespaceFile::of_process(member, Namespace::Pid)?;
    let uts = NamespaceFile::of_process(member, Namespace::Uts)?;

    net.enter()?;
    group.attach_self()?;
    mount::make_mounts_private()?;
    chroot::enter_root(&registry.path(id))?;
    pid_ns.enter()?;
    uts.enter()?;

    let program = request.command.first().map_or("", String::as_str);
    let mut command = stage::container_command(&request.command)?;
    let _ = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let status = command
        .spawn()
        .map_err(stage::spawn_error(program))?
        .wait()
        .map_err(stage::spawn_error(program))?;

    if let Err(e) = mount::unmount_proc(Path::new("/proc")) {
        tracing::warn!(error = %e, "cannot unmount attached /proc");
    }
    Ok(stage::exit_code(status))
}
