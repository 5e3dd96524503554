//! # bunker-image
//!
//! Image and snapshot management for the bunker runtime.
//!
//! Handles:
//! - **Storage**: the subvolume store seam, backed by btrfs or plain directories.
//! - **Registry**: identifier allocation, validation, snapshots, sidecars, listing.
//! - **Sources**: pulling official images from Docker Hub.
//! - **Layers**: unpacking gzip'd tar layers with whiteout handling.
//! - **Hashing**: SHA-256 digest verification of downloaded blobs.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod registry;
pub mod source;
pub mod storage;
