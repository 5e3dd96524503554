//! Identity and snapshot registry.
//!
//! Maps image and container identifiers onto subvolumes of the store:
//! `<store>/<id>` holds the root filesystem plus the `source` sidecar and,
//! for containers, the `command` sidecar and the `<id>.log` output log.
//!
//! Allocation checks for a free identifier and creates it in two steps. Two
//! invocations allocating at the same moment may pick the same token; the
//! loser's subvolume creation then fails instead of sharing the snapshot.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bunker_common::constants;
use bunker_common::error::{BunkerError, Result};
use bunker_common::types::{Identifier, Mode};
use chrono::{DateTime, Local};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::storage::{self, SubvolumeStore};

const TOKEN_LEN: usize = 8;

/// One row of an image or container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Identifier of the snapshot.
    pub id: Identifier,
    /// Content of the `source` sidecar, or `UNKNOWN`.
    pub source: String,
    /// Size of the regular files in MB with two decimals, or `UNKNOWN`.
    pub size: String,
    /// Last modification time of the subvolume.
    pub created: String,
    /// Content of the `command` sidecar; containers only.
    pub command: Option<String>,
}

/// The registry of snapshots in one store.
#[derive(Debug)]
pub struct Registry {
    store: Box<dyn SubvolumeStore>,
}

impl Registry {
    /// Wraps an already opened store.
    #[must_use]
    pub fn new(store: Box<dyn SubvolumeStore>) -> Self {
        Self { store }
    }

    /// Opens the registry over the best store available at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if no store can be opened at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Self::new(storage::open_store(root)?))
    }

    /// Directory holding every subvolume.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Path of the subvolume backing `id`.
    #[must_use]
    pub fn path(&self, id: &Identifier) -> PathBuf {
        self.store.root().join(id.to_string())
    }

    /// Path of a container's output log.
    #[must_use]
    pub fn log_path(&self, id: &Identifier) -> PathBuf {
        self.path(id)
            .join(format!("{id}.{}", constants::LOG_EXTENSION))
    }

    /// Whether a subvolume backs `id`.
    #[must_use]
    pub fn exists(&self, id: &Identifier) -> bool {
        self.store.is_subvolume(&self.path(id))
    }

    /// Picks a random identifier of `mode` that no subvolume uses yet.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Validation` if a generated token is malformed.
    pub fn allocate(&self, mode: Mode) -> Result<Identifier> {
        self.allocate_with(mode, random_token)
    }

    fn allocate_with(&self, mode: Mode, mut token: impl FnMut() -> String) -> Result<Identifier> {
        loop {
            let candidate = Identifier::new(mode, token())?;
            if !self.exists(&candidate) {
                tracing::debug!(id = %candidate, "identifier allocated");
                return Ok(candidate);
            }
            tracing::debug!(id = %candidate, "identifier taken, retrying");
        }
    }

    /// Parses `raw` as an identifier of `mode` and checks its subvolume exists.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::WrongMode` or `BunkerError::Validation` for a bad
    /// identifier, and `BunkerError::NotFound` if nothing backs it.
    pub fn validate(&self, raw: &str, mode: Mode) -> Result<Identifier> {
        let id = Identifier::parse(raw, mode)?;
        if !self.exists(&id) {
            return Err(BunkerError::NotFound {
                kind: mode.kind(),
                id: raw.to_string(),
            });
        }
        Ok(id)
    }

    /// Creates an empty subvolume for `id` recording `source` as its origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the subvolume or the sidecar cannot be created.
    pub fn create_empty(&self, id: &Identifier, source: &str) -> Result<()> {
        self.store.create(&self.path(id))?;
        self.write_source(id, source)?;
        tracing::info!(id = %id, source, "subvolume created");
        Ok(())
    }

    /// Creates `id` as a copy of the host directory `dir`.
    ///
    /// The `source` sidecar records `dir` as given.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Validation` if `dir` is not a directory, or an
    /// error if the subvolume cannot be populated.
    pub fn create_from_dir(&self, id: &Identifier, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Err(BunkerError::Validation {
                message: format!("source should be a directory: {}", dir.display()),
            });
        }
        self.create_empty(id, &dir.display().to_string())?;
        storage::copy_tree(dir, &self.path(id))
    }

    /// Snapshots `source` into the new identifier `target`.
    ///
    /// The `source` sidecar of the new snapshot names `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or the sidecar cannot be written.
    pub fn snapshot(&self, source: &Identifier, target: &Identifier) -> Result<()> {
        self.store.snapshot(&self.path(source), &self.path(target))?;
        self.write_source(target, &source.to_string())?;
        tracing::info!(source = %source, target = %target, "snapshot created");
        Ok(())
    }

    /// Deletes the subvolume of `id` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Storage` if the store refuses.
    pub fn remove(&self, id: &Identifier) -> Result<()> {
        self.store.delete(&self.path(id))?;
        tracing::info!(id = %id, "subvolume removed");
        Ok(())
    }

    /// Overwrites the `source` sidecar of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_source(&self, id: &Identifier, source: &str) -> Result<()> {
        let path = self.path(id).join(constants::SOURCE_FILE);
        std::fs::write(&path, source).map_err(|e| BunkerError::io(path, e))
    }

    /// Records the argument vector a container was started with, space-joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_command(&self, id: &Identifier, command: &[String]) -> Result<()> {
        let path = self.path(id).join(constants::COMMAND_FILE);
        std::fs::write(&path, command.join(" ")).map_err(|e| BunkerError::io(path, e))
    }

    /// Content of the `source` sidecar, if readable.
    #[must_use]
    pub fn read_source(&self, id: &Identifier) -> Option<String> {
        std::fs::read_to_string(self.path(id).join(constants::SOURCE_FILE)).ok()
    }

    /// Content of the `command` sidecar, if readable.
    #[must_use]
    pub fn read_command(&self, id: &Identifier) -> Option<String> {
        std::fs::read_to_string(self.path(id).join(constants::COMMAND_FILE)).ok()
    }

    /// Lists every snapshot of `mode`, sorted by identifier.
    ///
    /// Entries that are not subvolumes or carry another mode's prefix are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be read.
    pub fn list(&self, mode: Mode) -> Result<Vec<SnapshotEntry>> {
        let root = self.store.root();
        let dir = std::fs::read_dir(root).map_err(|e| BunkerError::io(root, e))?;
        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| BunkerError::io(root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(id) = Identifier::parse(&name, mode) else {
                continue;
            };
            let path = entry.path();
            if !self.store.is_subvolume(&path) {
                continue;
            }
            let created = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .map_or_else(|_| constants::UNKNOWN.to_string(), format_time);
            entries.push(SnapshotEntry {
                source: self
                    .read_source(&id)
                    .unwrap_or_else(|| constants::UNKNOWN.to_string()),
                size: dir_size(&path).map_or_else(|| constants::UNKNOWN.to_string(), format_size),
                created,
                command: match mode {
                    Mode::Process => Some(
                        self.read_command(&id)
                            .unwrap_or_else(|| constants::UNKNOWN.to_string()),
                    ),
                    Mode::Image => None,
                },
                id,
            });
        }
        entries.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));
        Ok(entries)
    }
}

fn random_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(TOKEN_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Total size of the non-directory entries under `path`, or `None` if any
/// part of the tree cannot be read.
fn dir_size(path: &Path) -> Option<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path).ok()? {
        let entry_path = entry.ok()?.path();
        let meta = std::fs::symlink_metadata(&entry_path).ok()?;
        total += if meta.is_dir() {
            dir_size(&entry_path)?
        } else {
            meta.len()
        };
    }
    Some(total)
}

fn format_size(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let megabytes = bytes as f64 / 1024.0 / 1024.0;
    format!("{megabytes:.2}MB")
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%b %e %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirStore;

    fn registry(dir: &Path) -> Registry {
        Registry::new(Box::new(DirStore::open(dir).expect("open store")))
    }

    fn rootfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("hello.txt"), "hello\n").expect("write");
        dir
    }

    #[test]
    fn allocated_ids_carry_mode_prefix() {
        let store = tempfile::tempdir().expect("tempdir");
        let id = registry(store.path()).allocate(Mode::Image).expect("allocate");
        assert!(id.to_string().starts_with("image_"));
        assert_eq!(id.token().len(), TOKEN_LEN);
    }

    #[test]
    fn allocation_skips_taken_tokens() {
        let store = tempfile::tempdir().expect("tempdir");
        let registry = registry(store.path());
        std::fs::create_dir(store.path().join("image_taken")).expect("mkdir");
        let mut tokens = vec!["free", "taken"];

        let id = registry
            .allocate_with(Mode::Image, move || tokens.pop().expect("token").to_string())
            .expect("allocate");
        assert_eq!(id.to_string(), "image_free");
    }

    #[test]
    fn init_round_trip_and_removal() {
        let store = tempfile::tempdir().expect("tempdir");
        let source = rootfs();
        let registry = registry(store.path());

        let id = registry.allocate(Mode::Image).expect("allocate");
        registry.create_from_dir(&id, source.path()).expect("init");
        assert_eq!(registry.validate(&id.to_string(), Mode::Image).expect("validate"), id);
        assert_eq!(
            registry.read_source(&id).expect("source"),
            source.path().display().to_string()
        );
        assert!(registry.path(&id).join("hello.txt").is_file());

        registry.remove(&id).expect("remove");
        let err = registry.validate(&id.to_string(), Mode::Image).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn validate_enforces_mode() {
        let store = tempfile::tempdir().expect("tempdir");
        let source = rootfs();
        let registry = registry(store.path());
        let id = registry.allocate(Mode::Image).expect("allocate");
        registry.create_from_dir(&id, source.path()).expect("init");

        let err = registry.validate(&id.to_string(), Mode::Process).unwrap_err();
        assert!(matches!(err, BunkerError::WrongMode { .. }));
    }

    #[test]
    fn init_rejects_files() {
        let store = tempfile::tempdir().expect("tempdir");
        let source = rootfs();
        let registry = registry(store.path());
        let id = registry.allocate(Mode::Image).expect("allocate");
        let err = registry
            .create_from_dir(&id, &source.path().join("hello.txt"))
            .unwrap_err();
        assert!(matches!(err, BunkerError::Validation { .. }));
        assert!(!registry.exists(&id));
    }

    #[test]
    fn container_snapshot_is_isolated_from_image() {
        let store = tempfile::tempdir().expect("tempdir");
        let source = rootfs();
        let registry = registry(store.path());
        let image = registry.allocate(Mode::Image).expect("allocate");
        registry.create_from_dir(&image, source.path()).expect("init");

        let container = registry.allocate(Mode::Process).expect("allocate");
        registry.snapshot(&image, &container).expect("snapshot");
        std::fs::write(registry.path(&container).join("hello.txt"), "changed").expect("write");

        assert_eq!(
            std::fs::read_to_string(registry.path(&image).join("hello.txt")).expect("read"),
            "hello\n"
        );
        assert_eq!(registry.read_source(&container), Some(image.to_string()));
    }

    #[test]
    fn list_filters_by_mode_and_renders_sidecars() {
        let store = tempfile::tempdir().expect("tempdir");
        let source = rootfs();
        let registry = registry(store.path());
        let image = registry.allocate(Mode::Image).expect("allocate");
        registry.create_from_dir(&image, source.path()).expect("init");
        let container = registry.allocate(Mode::Process).expect("allocate");
        registry.snapshot(&image, &container).expect("snapshot");
        registry
            .write_command(&container, &["/bin/echo".into(), "hi".into()])
            .expect("command");
        std::fs::write(store.path().join("stray.txt"), "").expect("write");

        let images = registry.list(Mode::Image).expect("list");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, image);
        assert_eq!(images[0].source, source.path().display().to_string());
        assert!(images[0].size.ends_with("MB"));
        assert_eq!(images[0].command, None);

        let containers = registry.list(Mode::Process).expect("list");
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].source, image.to_string());
        assert_eq!(containers[0].command.as_deref(), Some("/bin/echo hi"));
    }

    #[test]
    fn missing_sidecars_render_unknown() {
        let store = tempfile::tempdir().expect("tempdir");
        let registry = registry(store.path());
        std::fs::create_dir(store.path().join("process_bare")).expect("mkdir");

        let containers = registry.list(Mode::Process).expect("list");
        assert_eq!(containers[0].source, "UNKNOWN");
        assert_eq!(containers[0].command.as_deref(), Some("UNKNOWN"));
    }

    #[test]
    fn sizes_use_two_decimals() {
        assert_eq!(format_size(0), "0.00MB");
        assert_eq!(format_size(1024 * 1024 * 3 / 2), "1.50MB");
    }

    #[test]
    fn log_lives_inside_the_snapshot() {
        let store = tempfile::tempdir().expect("tempdir");
        let registry = registry(store.path());
        let id = Identifier::new(Mode::Process, "abc").expect("id");
        assert_eq!(
            registry.log_path(&id),
            store.path().join("process_abc/process_abc.log")
        );
    }
}
