//! Filesystem management for container isolation.
//!
//! Roots processes into a container snapshot with `chroot`, mounts a private
//! `/proc`, and seeds the container's resolver configuration.

pub mod chroot;
pub mod mount;
pub mod resolv;
