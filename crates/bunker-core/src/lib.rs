//! # bunker-core
//!
//! Low-level Linux isolation primitives for the bunker runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v1**: per-container CPU and memory limits, membership, teardown.
//! - **Namespaces**: handles on mount, network, PID, and UTS namespaces,
//!   creating fresh ones and entering existing ones.
//! - **Network**: an rtnetlink client and the veth/bridge provisioner that
//!   gives each container a private network namespace.
//! - **Filesystem**: rootfs preparation, `chroot`, and `/proc` mounting.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod network;
