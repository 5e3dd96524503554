//! Container lifecycle management for the bunker runtime.
//!
//! A container starts in two stages. `run` re-executes the bunker binary as
//! a `bootstrap` child inside fresh mount, PID, and UTS namespaces joined to
//! a freshly provisioned network namespace; the child sets up the control
//! group and root filesystem, then starts the user's command. `exec` does
//! the same through an `attach` child that joins an existing container.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod joiner;
pub mod launcher;
pub mod liveness;
pub mod logs;
pub mod stage;
