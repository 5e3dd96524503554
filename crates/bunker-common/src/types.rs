//! Domain primitive types used across the bunker workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BunkerError, Result};

/// Role of a snapshot, encoded as the identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A reusable root filesystem.
    Image,
    /// A container snapshotted from an image.
    Process,
}

impl Mode {
    /// Prefix every identifier of this mode starts with.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Image => "image_",
            Self::Process => "process_",
        }
    }

    /// Noun used in diagnostics.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Process => "container",
        }
    }

    const fn other(self) -> Self {
        match self {
            Self::Image => Self::Process,
            Self::Process => Self::Image,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Identifier of an image or container: a mode prefix plus an allocation token.
///
/// The token is restricted to ASCII alphanumerics so an identifier can be
/// joined onto the store path without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    mode: Mode,
    token: String,
}

impl Identifier {
    /// Builds an identifier from its parts.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Validation` if the token is empty or contains
    /// anything but ASCII alphanumerics.
    pub fn new(mode: Mode, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if !is_valid_token(&token) {
            return Err(BunkerError::Validation {
                message: format!("malformed identifier token: {token:?}"),
            });
        }
        Ok(Self { mode, token })
    }

    /// Parses `raw`, requiring it to carry the prefix of `expected`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::WrongMode` if `raw` is a well-formed identifier
    /// of the other mode, and `BunkerError::Validation` if it is malformed.
    pub fn parse(raw: &str, expected: Mode) -> Result<Self> {
        if let Some(token) = raw.strip_prefix(expected.prefix()) {
            return Self::new(expected, token);
        }
        let other = expected.other();
        if raw
            .strip_prefix(other.prefix())
            .is_some_and(is_valid_token)
        {
            return Err(BunkerError::WrongMode {
                id: raw.to_string(),
                expected,
            });
        }
        Err(BunkerError::Validation {
            message: format!("wrong id {raw:?}: expected {}<token>", expected.prefix()),
        })
    }

    /// Returns the mode encoded in the prefix.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns the allocation token without its prefix.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.mode.prefix(), self.token)
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Resource limits written into a container's control group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU shares (relative weight).
    pub cpu_shares: u64,
    /// Memory ceiling in bytes.
    pub memory_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_shares: crate::constants::DEFAULT_CPU_SHARES,
            memory_bytes: crate::constants::DEFAULT_MEMORY_BYTES,
        }
    }
}

/// Phase of a single `run` invocation.
///
/// `Requested` covers validation, allocation, and snapshotting; the launcher
/// moves to `Bootstrapping` when it re-executes itself into new namespaces,
/// to `Running` once the user's command has started, and to `Exited` when the
/// bootstrap child has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerPhase {
    /// Snapshot being prepared.
    Requested,
    /// Bootstrap child spawned into fresh namespaces.
    Bootstrapping,
    /// User command started.
    Running,
    /// User command and bootstrap child are gone.
    Exited,
}

impl ContainerPhase {
    /// Moves to `next`, refusing to skip backwards.
    ///
    /// Any phase may jump straight to `Exited` so failures can close out
    /// the lifecycle from wherever they happened.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Validation` for any other transition.
    pub fn advance(self, next: Self) -> Result<Self> {
        let allowed = matches!(
            (self, next),
            (Self::Requested, Self::Bootstrapping)
                | (Self::Bootstrapping, Self::Running)
                | (_, Self::Exited)
        ) && self != Self::Exited;
        if allowed {
            Ok(next)
        } else {
            Err(BunkerError::Validation {
                message: format!("illegal container phase transition {self} -> {next}"),
            })
        }
    }
}

impl fmt::Display for ContainerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Status column reported by `ps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// The container's control group has at least one member.
    Running,
    /// No live member process.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_displays_prefix_and_token() {
        let id = Identifier::new(Mode::Image, "a1b2").unwrap();
        assert_eq!(id.to_string(), "image_a1b2");
        assert_eq!(id.token(), "a1b2");
    }

    #[test]
    fn parse_accepts_matching_mode() {
        let id = Identifier::parse("process_42x", Mode::Process).unwrap();
        assert_eq!(id.mode(), Mode::Process);
        assert_eq!(id.token(), "42x");
    }

    #[test]
    fn parse_rejects_other_mode() {
        let err = Identifier::parse("image_42", Mode::Process).unwrap_err();
        assert!(matches!(err, BunkerError::WrongMode { expected: Mode::Process, .. }));

        let err = Identifier::parse("process_42", Mode::Image).unwrap_err();
        assert!(matches!(err, BunkerError::WrongMode { expected: Mode::Image, .. }));
    }

    #[test]
    fn parse_rejects_malformed() {
        for raw in ["", "image_", "img_12", "image_../etc", "process_a/b", "12"] {
            let err = Identifier::parse(raw, Mode::Image).unwrap_err();
            assert!(
                matches!(err, BunkerError::Validation { .. }),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn default_limits_match_runtime_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_shares, 1024);
        assert_eq!(limits.memory_bytes, 1_024_000_000);
    }

    #[test]
    fn phases_advance_in_order() {
        let phase = ContainerPhase::Requested
            .advance(ContainerPhase::Bootstrapping)
            .and_then(|p| p.advance(ContainerPhase::Running))
            .and_then(|p| p.advance(ContainerPhase::Exited))
            .unwrap();
        assert_eq!(phase, ContainerPhase::Exited);
    }

    #[test]
    fn phases_reject_backwards_and_restart() {
        assert!(ContainerPhase::Running.advance(ContainerPhase::Requested).is_err());
        assert!(ContainerPhase::Requested.advance(ContainerPhase::Running).is_err());
        assert!(ContainerPhase::Exited.advance(ContainerPhase::Exited).is_err());
        assert!(ContainerPhase::Requested.advance(ContainerPhase::Exited).is_ok());
    }

    #[test]
    fn status_renders_upper_case() {
        assert_eq!(ContainerStatus::Stopped.to_string(), "STOPPED");
        assert_eq!(ContainerStatus::Running.to_string(), "RUNNING");
    }
}
