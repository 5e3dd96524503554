//! First stage: starting a new container.
//!
//! The parent provisions the container network, then re-executes itself as
//! `bootstrap`. Between fork and exec the child joins the new network
//! namespace by descriptor and unshares mount, PID, and UTS namespaces, so
//! the parent never leaves its own namespaces. An unshared PID namespace
//! only applies to later children, so the bootstrap forks once: the forked
//! process is PID 1 of the container. It builds the control group and root
//! filesystem and runs the user's command, teeing its output into the log.
//!
//! ```text
//! run ──▶ provision network ──▶ spawn bootstrap ──▶ wait ──▶ delete cgroup ──▶ release network
//!                                     │
//!                                     └─▶ fork init ──▶ cgroup + hostname + chroot ──▶ spawn command ──▶ wait ──▶ umount /proc
//! ```

use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Stdio};

use bunker_common::config::BunkerConfig;
use bunker_common::constants;
use bunker_common::error::{BunkerError, Result};
use bunker_common::types::{ContainerPhase, Identifier};
use bunker_core::cgroup::CgroupTree;
use bunker_core::filesystem::{chroot, mount, resolv};
use bunker_core::namespace::{self, Namespace, NamespaceFile, uts};
use bunker_core::network::NetworkContext;
use bunker_image::registry::Registry;
use nix::sched::{CloneFlags, setns, unshare};
use nix::sys::signal::{SigHandler, Signal, kill, signal};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, fork};

use crate::logs;
use crate::stage::{self, Stage, StageRequest};

const BOOTSTRAP_NAMESPACES: [Namespace; 3] = [Namespace::Mount, Namespace::Pid, Namespace::Uts];

fn advance(id: &Identifier, phase: ContainerPhase, next: ContainerPhase) -> Result<ContainerPhase> {
    let next = phase.advance(next)?;
    tracing::info!(id = %id, from = %phase, to = %next, "container phase changed");
    Ok(next)
}

/// Runs `command` as the first process of container `id`.
///
/// The container snapshot must already exist. The network is released and
/// the control group deleted on every path once they exist. Returns the
/// command's exit code.
///
/// # Errors
///
/// Returns an error if the network cannot be provisioned, the bootstrap
/// child cannot be started, or teardown fails. A failure inside the
/// container shows up as a non-zero exit code instead.
pub fn launch(
    config: &BunkerConfig,
    registry: &Registry,
    id: &Identifier,
    command: &[String],
) -> Result<i32> {
    let request = StageRequest::new(Stage::Bootstrap, id.clone(), command.to_vec())?;

    let mut network = NetworkContext::provision(&config.bridge, config.subnet)?;
    let outcome = registry
        .write_command(id, command)
        .and_then(|()| supervise(config, &request, network.namespace()));
    let released = network.release();
    settle(id, outcome, released)
}

/// Reports the first failure; a release error behind it is only logged.
fn settle(id: &Identifier, outcome: Result<i32>, released: Result<()>) -> Result<i32> {
    match outcome {
        Ok(code) => released.map(|()| code),
        Err(e) => {
            if let Err(teardown) = released {
                tracing::warn!(id = %id, error = %teardown, "cannot release container network");
            }
            Err(e)
        }
    }
}

fn supervise(config: &BunkerConfig, request: &StageRequest, netns: &NamespaceFile) -> Result<i32> {
    let id = &request.id;
    // The terminal interrupts the whole foreground group; the parent has to
    // outlive the container to tear it down.
    if let Err(e) = ctrlc::set_handler(|| tracing::debug!("interrupt forwarded to the container")) {
        tracing::warn!(error = %e, "cannot install interrupt handler");
    }

    let mut child = spawn_bootstrap(config, request, netns)?;
    let phase = advance(id, ContainerPhase::Requested, ContainerPhase::Bootstrapping)?;
    let status = child.wait().map_err(stage::spawn_error(Stage::Bootstrap.name()))?;
    let _ = advance(id, phase, ContainerPhase::Exited)?;

    match CgroupTree::from_config(config).load(&id.to_string()) {
        Ok(group) => group.delete()?,
        Err(e) if e.is_not_found() => {
            tracing::debug!(id = %id, "bootstrap left no control group behind");
        }
        Err(e) => return Err(e),
    }
    let code = stage::exit_code(status);
    tracing::info!(id = %id, code, "container exited");
    Ok(code)
}

fn spawn_bootstrap(config: &BunkerConfig, request: &StageRequest, netns: &NamespaceFile) -> Result<Child> {
    let mut command = stage::self_command(config, request);
    let _ = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let net_fd = netns.as_raw_fd();
    let flags = namespace::clone_flags(&BOOTSTRAP_NAMESPACES);
    // SAFETY: the hook runs between fork and exec and only issues setns(2)
    // and unshare(2). `net_fd` belongs to the caller's NetworkContext, which
    // outlives the spawn.
    let _ = unsafe {
        command.pre_exec(move || {
            setns(BorrowedFd::borrow_raw(net_fd), CloneFlags::CLONE_NEWNET)?;
            unshare(flags)?;
            Ok(())
        })
    };
    let child = command
        .spawn()
        .map_err(stage::spawn_error(Stage::Bootstrap.name()))?;
    tracing::debug!(id = %request.id, pid = child.id(), "bootstrap child spawned");
    Ok(child)
}

/// Second half of [`launch`], running in the re-executed bootstrap child.
///
/// Forks the container init and waits for it. The init creates and joins
/// the control group, names the host after the container, roots itself in
/// the snapshot, then runs the command with its output duplicated into
/// `/<id>.log`. Both sides return the command's exit code.
///
/// # Errors
///
/// Returns an error if the init cannot be forked or reaped. Inside the
/// init, any setup step failing or the command not starting is an error.
pub fn bootstrap(config: &BunkerConfig, registry: &Registry, request: &StageRequest) -> Result<i32> {
    // SAFETY: the stage process has not started any thread yet, so the
    // child may continue with arbitrary code.
    let forked = unsafe { fork() }
        .map_err(|e| BunkerError::namespace(format!("cannot fork container init: {e}")))?;
    match forked {
        ForkResult::Parent { child } => reap(&request.id, child),
        ForkResult::Child => contain(config, registry, request),
    }
}

fn reap(id: &Identifier, init: Pid) -> Result<i32> {
    // The init handles the terminal's interrupt and this side waits for it.
    // SAFETY: SIG_IGN installs no handler code.
    if let Err(e) = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) } {
        tracing::warn!(error = %e, "cannot ignore interrupts");
    }
    let status = waitpid(init, None)
        .map_err(|e| BunkerError::namespace(format!("cannot wait for container init {init}: {e}")))?;
    tracing::debug!(id = %id, pid = %init, "container init finished");
    Ok(stage::wait_code(status))
}

fn contain(config: &BunkerConfig, registry: &Registry, request: &StageRequest) -> Result<i32> {
    let id = &request.id;
    let name = id.to_string();
    let rootfs = registry.path(id);

    let group = CgroupTree::from_config(config).create(&name, &config.limits)?;
    group.attach_self()?;
    uts::set_hostname(&name)?;
    mount::make_mounts_private()?;
    chroot::prepare_rootfs(&rootfs)?;
    chroot::enter_root(&rootfs)?;

    if let Err(e) = resolv::append_nameserver(Path::new("/etc/resolv.conf"), &config.dns) {
        tracing::warn!(error = %e, "cannot add fallback nameserver");
    }
    let log_path = Path::new("/").join(format!("{name}.{}", constants::LOG_EXTENSION));
    let log = logs::open_log(&log_path)?;

    let program = request.command.first().map_or("", String::as_str);
    let mut command = stage::container_command(&request.command)?;
    let _ = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(stage::spawn_error(program))?;
    let phase = advance(id, ContainerPhase::Bootstrapping, ContainerPhase::Running)?;

    // A command that handles SIGINT still ends on an interrupt.
    if let Ok(pid) = i32::try_from(child.id()).map(Pid::from_raw) {
        if let Err(e) = ctrlc::set_handler(move || {
            let _ = kill(pid, Signal::SIGKILL);
        }) {
            tracing::warn!(error = %e, "cannot install interrupt handler");
        }
    }

    let pumps = [
        child.stdout.take().map(|out| {
            log.try_clone()
                .map(|copy| ("stdout", logs::spawn_pump(out, std::io::stdout(), copy)))
        }),
        child.stderr.take().map(|err| {
            log.try_clone()
                .map(|copy| ("stderr", logs::spawn_pump(err, std::io::stderr(), copy)))
        }),
    ];

    let status = child.wait().map_err(stage::spawn_error(program))?;
    for pump in pumps.into_iter().flatten() {
        match pump {
            Ok((stream, handle)) => logs::join_pump(stream, handle),
            Err(e) => tracing::warn!(error = %e, "cannot duplicate log handle"),
        }
    }
    let _ = advance(id, phase, ContainerPhase::Exited)?;

    if let Err(e) = mount::unmount_proc(Path::new("/proc")) {
        tracing::warn!(error = %e, "cannot unmount container /proc");
    }
    Ok(stage::exit_code(status))
}
