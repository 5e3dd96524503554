//! Linux namespace management for container isolation.
//!
//! Provides safe wrappers around `unshare(2)` and `setns(2)`. A namespace is
//! addressed through its `/proc/<pid>/ns/<name>` file; holding that file open
//! keeps the namespace alive and lets a process enter it later.

pub mod network;
pub mod pid;
pub mod uts;

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use bunker_common::error::{BunkerError, Result};
use nix::sched::{CloneFlags, setns, unshare};

/// Namespace kinds bunker creates or joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Mount table.
    Mount,
    /// Network stack.
    Net,
    /// Process ID space.
    Pid,
    /// Hostname.
    Uts,
}

impl Namespace {
    /// Name of the namespace file under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Uts => "uts",
        }
    }

    /// Flag selecting this namespace in `unshare(2)`/`setns(2)`.
    #[must_use]
    pub const fn flag(self) -> CloneFlags {
        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }
}

/// Combines the flags of several namespaces.
#[must_use]
pub fn clone_flags(namespaces: &[Namespace]) -> CloneFlags {
    namespaces
        .iter()
        .fold(CloneFlags::empty(), |acc, ns| acc | ns.flag())
}

/// Detaches the calling thread into fresh namespaces of the given kinds.
///
/// A new PID namespace only applies to children forked afterwards.
///
/// # Errors
///
/// Returns `BunkerError::Namespace` if `unshare(2)` fails.
pub fn create(namespaces: &[Namespace]) -> Result<()> {
    unshare(clone_flags(namespaces))
        .map_err(|e| BunkerError::namespace(format!("unshare {namespaces:?} failed: {e}")))?;
    tracing::debug!(?namespaces, "namespaces created");
    Ok(())
}

/// An open handle on a namespace.
#[derive(Debug)]
pub struct NamespaceFile {
    kind: Namespace,
    path: PathBuf,
    fd: OwnedFd,
}

impl NamespaceFile {
    /// Opens the namespace of `kind` the calling thread currently belongs to.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Namespace` if the namespace file cannot be opened.
    pub fn current(kind: Namespace) -> Result<Self> {
        Self::open(kind, Path::new("/proc/thread-self/ns").join(kind.proc_name()))
    }

    /// Opens the namespace of `kind` process `pid` belongs to.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Namespace` if the namespace file cannot be opened.
    pub fn of_process(pid: u32, kind: Namespace) -> Result<Self> {
        Self::open(kind, PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_name())))
    }

    fn open(kind: Namespace, path: PathBuf) -> Result<Self> {
        let file = std::fs::File::open(&path).map_err(|e| {
            BunkerError::namespace(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(Self {
            kind,
            path,
            fd: OwnedFd::from(file),
        })
    }

    /// Moves the calling thread into this namespace.
    ///
    /// Entering a PID namespace only affects children forked afterwards.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Namespace` if `setns(2)` fails.
    pub fn enter(&self) -> Result<()> {
        setns(&self.fd, self.kind.flag()).map_err(|e| {
            BunkerError::namespace(format!("setns {} failed: {e}", self.path.display()))
        })?;
        tracing::debug!(path = %self.path.display(), "entered namespace");
        Ok(())
    }

    /// Which namespace this handle refers to.
    #[must_use]
    pub const fn kind(&self) -> Namespace {
        self.kind
    }
}

impl AsFd for NamespaceFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for NamespaceFile {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
