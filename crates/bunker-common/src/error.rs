//! Unified error types for the bunker workspace.
//!
//! Every failure is fatal to the invocation that hit it. The variants mirror
//! the layer that failed so the top-level diagnostic names the culprit:
//! identifier validation, control groups, namespaces, the snapshot store,
//! networking, or starting the user's command.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Mode;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BunkerError {
    /// An argument or identifier is malformed.
    #[error("invalid input: {message}")]
    Validation {
        /// Description of what was rejected.
        message: String,
    },

    /// An identifier is well-formed but no subvolume backs it.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An identifier carries the prefix of another mode.
    #[error("wrong id {id}: expected {expected} mode")]
    WrongMode {
        /// The rejected identifier.
        id: String,
        /// The mode the caller asked for.
        expected: Mode,
    },

    /// A control-group operation failed.
    #[error("cgroup error at {path}: {message}")]
    Resource {
        /// Cgroup directory involved.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Creating, entering, or leaving a namespace failed.
    #[error("namespace error: {message}")]
    Namespace {
        /// Description of the failure.
        message: String,
    },

    /// A subvolume create, snapshot, or delete failed.
    #[error("storage error at {path}: {message}")]
    Storage {
        /// Subvolume path involved.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Veth, bridge, address, or route configuration failed.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// The user's command could not be started.
    #[error("failed to execute {command}: {source}")]
    Execution {
        /// Program that failed to start.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Talking to the remote image registry failed.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },
}

impl BunkerError {
    /// Shorthand for an [`BunkerError::Io`] error at `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a [`BunkerError::Namespace`] error.
    pub fn namespace(message: impl Into<String>) -> Self {
        Self::Namespace {
            message: message.into(),
        }
    }

    /// Shorthand for a [`BunkerError::Network`] error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Returns true for the "no such identifier" case.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BunkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_mode_message_names_expected_mode() {
        let err = BunkerError::WrongMode {
            id: "image_ab12".into(),
            expected: Mode::Process,
        };
        assert_eq!(err.to_string(), "wrong id image_ab12: expected process mode");
    }

    #[test]
    fn not_found_is_detected() {
        let err = BunkerError::NotFound {
            kind: "image",
            id: "image_x".into(),
        };
        assert!(err.is_not_found());
        assert!(!BunkerError::network("down").is_not_found());
    }
}
