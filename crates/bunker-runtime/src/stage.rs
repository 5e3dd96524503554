//! Messages passed across the self re-invocation boundary.
//!
//! Namespaces created with `unshare` only take full effect for new
//! processes, so both `run` and `exec` re-execute the bunker binary with a
//! hidden sub-command. A [`StageRequest`] is the typed form of that argument
//! list.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, ExitStatus};

use bunker_common::config::BunkerConfig;
use bunker_common::constants;
use bunker_common::error::{BunkerError, Result};
use bunker_common::types::{Identifier, Mode};
use bunker_core::filesystem::mount;
use nix::sys::wait::WaitStatus;

const SELF_EXE: &str = "/proc/self/exe";

/// Internal sub-command a re-executed bunker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Sets up a new container and runs its first command.
    Bootstrap,
    /// Joins a running container and runs one more command.
    Attach,
}

impl Stage {
    /// Sub-command name on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Attach => "attach",
        }
    }
}

/// What a re-executed stage is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRequest {
    /// Which stage runs.
    pub stage: Stage,
    /// Target container.
    pub id: Identifier,
    /// Argument vector of the user's command.
    pub command: Vec<String>,
}

impl StageRequest {
    /// Builds a request.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::WrongMode` if `id` is not a container, and
    /// `BunkerError::Validation` if `command` is empty.
    pub fn new(stage: Stage, id: Identifier, command: Vec<String>) -> Result<Self> {
        if id.mode() != Mode::Process {
            return Err(BunkerError::WrongMode {
                id: id.to_string(),
                expected: Mode::Process,
            });
        }
        if command.is_empty() {
            return Err(BunkerError::Validation {
                message: format!("{}: no command given", stage.name()),
            });
        }
        Ok(Self { stage, id, command })
    }

    /// Decodes the positional arguments of a stage sub-command.
    ///
    /// # Errors
    ///
    /// Same as [`StageRequest::new`], plus `BunkerError::Validation` for a
    /// malformed identifier.
    pub fn parse(stage: Stage, raw_id: &str, command: Vec<String>) -> Result<Self> {
        Self::new(stage, Identifier::parse(raw_id, Mode::Process)?, command)
    }

    /// Encodes the request as `<stage> <id> -- <command...>`.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        [self.stage.name().to_string(), self.id.to_string(), "--".to_string()]
            .into_iter()
            .chain(self.command.iter().cloned())
            .collect()
    }
}

/// A command re-executing this binary for `request`.
///
/// The store, cgroup root, and bridge are forwarded so both stages operate
/// on the same host resources.
#[must_use]
pub fn self_command(config: &BunkerConfig, request: &StageRequest) -> Command {
    let mut command = Command::new(SELF_EXE);
    let _ = command
        .arg("--store")
        .arg(&config.store_dir)
        .arg("--cgroup-root")
        .arg(&config.cgroup_root)
        .arg("--bridge")
        .arg(&config.bridge)
        .args(request.to_args());
    command
}

/// A command running `argv` inside an already entered container root.
///
/// The environment is reduced to `PATH`, and the child mounts a fresh
/// `/proc` for its PID namespace before exec.
///
/// # Errors
///
/// Returns `BunkerError::Validation` if `argv` is empty.
pub fn container_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv.split_first().ok_or_else(|| BunkerError::Validation {
        message: "no command given".into(),
    })?;
    let mut command = Command::new(program);
    let _ = command
        .args(args)
        .env_clear()
        .env("PATH", constants::CONTAINER_PATH);
    // SAFETY: the hook runs between fork and exec and only issues mount(2)
    // on a static path; it neither allocates nor takes locks.
    let _ = unsafe {
        command.pre_exec(|| {
            mount::mount_proc(Path::new("/proc")).map_err(std::io::Error::from)
        })
    };
    Ok(command)
}

/// Exit code reported for a finished child: its own code, or 128 plus the
/// signal number that killed it.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(1, |signal| 128 + signal))
}

/// Same as [`exit_code`] for a process reaped with `waitpid`.
#[must_use]
pub fn wait_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => 1,
    }
}

/// Wraps a spawn failure as `BunkerError::Execution`.
pub(crate) fn spawn_error(program: &str) -> impl FnOnce(std::io::Error) -> BunkerError + '_ {
    move |source| BunkerError::Execution {
        command: program.to_string(),
        source,
    }
}
