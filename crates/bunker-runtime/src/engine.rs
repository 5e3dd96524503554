//! Runtime engine that maps every CLI command onto component operations.
//!
//! Each command runs in its own short-lived invocation, so the engine holds
//! no state beyond the configuration and the snapshot registry it opened.

use std::io::Write;
use std::path::Path;

use bunker_common::config::BunkerConfig;
use bunker_common::error::{BunkerError, Result};
use bunker_common::types::{ContainerStatus, Identifier, Mode};
use bunker_core::cgroup::CgroupTree;
use bunker_image::registry::{Registry, SnapshotEntry};
use bunker_image::source::{HubClient, ImageReference};

use crate::stage::{Stage, StageRequest};
use crate::{joiner, launcher, liveness, logs};

/// One row of `ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRow {
    /// Snapshot details.
    pub entry: SnapshotEntry,
    /// Liveness at the time of the listing.
    pub status: ContainerStatus,
}

/// The runtime engine that coordinates all image and container operations.
#[derive(Debug)]
pub struct Engine {
    config: BunkerConfig,
    registry: Registry,
}

impl Engine {
    /// Opens the snapshot store named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn new(config: BunkerConfig) -> Result<Self> {
        let registry = Registry::open(&config.store_dir)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Creates an engine over an already opened registry.
    #[must_use]
    pub const fn with_registry(config: BunkerConfig, registry: Registry) -> Self {
        Self { config, registry }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &BunkerConfig {
        &self.config
    }

    /// The snapshot registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    fn cgroups(&self) -> CgroupTree {
        CgroupTree::from_config(&self.config)
    }

    /// Creates an image from a copy of the host directory `dir`.
    ///
    /// `on_created` sees the new identifier before the copy starts. A failed
    /// copy removes the half-built image.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Validation` if `dir` is not a directory, or an
    /// error if the image cannot be created.
    pub fn init(&self, dir: &Path, on_created: impl FnOnce(&Identifier)) -> Result<Identifier> {
        if !dir.is_dir() {
            return Err(BunkerError::Validation {
                message: format!("source should be a directory: {}", dir.display()),
            });
        }
        let id = self.registry.allocate(Mode::Image)?;
        on_created(&id);
        self.populate(&id, || self.registry.create_from_dir(&id, dir))?;
        Ok(id)
    }

    /// Pulls an official image from Docker Hub into a new image.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the download fails; a
    /// partial image is removed first.
    pub fn pull(&self, image: &str, on_created: impl FnOnce(&Identifier)) -> Result<Identifier> {
        let reference = ImageReference::parse(image)?;
        self.pull_from(&HubClient::new()?, &reference, on_created)
    }

    /// Like [`Engine::pull`] with an explicit client.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails; a partial image is removed
    /// first.
    pub fn pull_from(
        &self,
        client: &HubClient,
        reference: &ImageReference,
        on_created: impl FnOnce(&Identifier),
    ) -> Result<Identifier> {
        let id = self.registry.allocate(Mode::Image)?;
        on_created(&id);
        self.populate(&id, || {
            self.registry.create_empty(&id, &reference.to_string())?;
            let _ = client.pull(reference, &self.registry.path(&id))?;
            Ok(())
        })?;
        Ok(id)
    }

    fn populate(&self, id: &Identifier, fill: impl FnOnce() -> Result<()>) -> Result<()> {
        let Err(e) = fill() else {
            return Ok(());
        };
        if self.registry.exists(id) {
            if let Err(cleanup) = self.registry.remove(id) {
                tracing::warn!(id = %id, error = %cleanup, "cannot remove partial image");
            }
        }
        Err(e)
    }

    /// Deletes an image.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not an existing image or the store
    /// refuses.
    pub fn rmi(&self, raw: &str) -> Result<Identifier> {
        let id = self.registry.validate(raw, Mode::Image)?;
        self.registry.remove(&id)?;
        Ok(id)
    }

    /// Lists every image.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn images(&self) -> Result<Vec<SnapshotEntry>> {
        self.registry.list(Mode::Image)
    }

    /// Lists every container with its liveness.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn ps(&self) -> Result<Vec<ContainerRow>> {
        let cgroups = self.cgroups();
        Ok(self
            .registry
            .list(Mode::Process)?
            .into_iter()
            .map(|entry| ContainerRow {
                status: liveness::is_alive(&cgroups, &entry.id).status(),
                entry,
            })
            .collect())
    }

    /// Snapshots image `raw` into a new container.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not an existing image or the snapshot
    /// fails.
    pub fn create_container(&self, raw: &str) -> Result<Identifier> {
        let image = self.registry.validate(raw, Mode::Image)?;
        let id = self.registry.allocate(Mode::Process)?;
        self.registry.snapshot(&image, &id)?;
        Ok(id)
    }

    /// Creates a container from image `raw` and runs `command` in it.
    ///
    /// `on_created` sees the container identifier before the command
    /// starts. Returns the command's exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created or started, or
    /// its teardown fails.
    pub fn run(
        &self,
        raw: &str,
        command: &[String],
        on_created: impl FnOnce(&Identifier),
    ) -> Result<i32> {
        if command.is_empty() {
            return Err(BunkerError::Validation {
                message: "run: no command given".into(),
            });
        }
        let id = self.create_container(raw)?;
        on_created(&id);
        launcher::launch(&self.config, &self.registry, &id, command)
    }

    /// Entry point of the re-executed `bootstrap` stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is malformed or container setup fails.
    pub fn bootstrap(&self, raw: &str, command: Vec<String>) -> Result<i32> {
        let request = StageRequest::parse(Stage::Bootstrap, raw, command)?;
        launcher::bootstrap(&self.config, &self.registry, &request)
    }

    /// Runs `command` inside the running container `raw`.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not an existing, running container or
    /// the command cannot be started.
    pub fn exec(&self, raw: &str, command: &[String]) -> Result<i32> {
        let id = self.registry.validate(raw, Mode::Process)?;
        joiner::join(&self.config, &id, command)
    }

    /// Entry point of the re-executed `attach` stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is malformed or the container cannot
    /// be joined.
    pub fn attach(&self, raw: &str, command: Vec<String>) -> Result<i32> {
        let request = StageRequest::parse(Stage::Attach, raw, command)?;
        joiner::attach(&self.config, &self.registry, &request)
    }

    /// Writes the output log of container `raw` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not an existing container or the log
    /// cannot be read.
    pub fn logs(&self, raw: &str, out: &mut impl Write) -> Result<u64> {
        let id = self.registry.validate(raw, Mode::Process)?;
        logs::stream(&self.registry.log_path(&id), out)
    }

    /// Deletes a container.
    ///
    /// A running container is removed too; its processes keep running on
    /// the orphaned root until they exit.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not an existing container or the store
    /// refuses.
    pub fn rm(&self, raw: &str) -> Result<Identifier> {
        let id = self.registry.validate(raw, Mode::Process)?;
        let probe = liveness::is_alive(&self.cgroups(), &id);
        if probe.alive() {
            tracing::warn!(id = %id, processes = ?probe.processes, "removing a running container");
        }
        self.registry.remove(&id)?;
        Ok(id)
    }

    /// Replaces image `image_raw` with the current state of container
    /// `container_raw`.
    ///
    /// The image keeps its identifier and its recorded source; its previous
    /// content is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if either identifier is invalid or the snapshot
    /// fails.
    pub fn commit(&self, container_raw: &str, image_raw: &str) -> Result<Identifier> {
        let container = self.registry.validate(container_raw, Mode::Process)?;
        let image = self.registry.validate(image_raw, Mode::Image)?;
        let source = self
            .registry
            .read_source(&image)
            .unwrap_or_else(|| container.to_string());

        self.registry.remove(&image)?;
        self.registry.snapshot(&container, &image)?;
        self.registry.write_source(&image, &source)?;
        tracing::info!(container = %container, image = %image, "container committed");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use bunker_image::storage::DirStore;

    use super::*;

    fn engine(dir: &Path) -> Engine {
        let config = BunkerConfig {
            store_dir: dir.join("store"),
            cgroup_root: dir.join("cgroup"),
            ..BunkerConfig::default()
        };
        let registry = Registry::new(Box::new(DirStore::open(&config.store_dir).expect("store")));
        Engine::with_registry(config, registry)
    }

    fn rootfs(dir: &Path) -> std::path::PathBuf {
        let root = dir.join("rootfs");
        std::fs::create_dir_all(root.join("bin")).expect("mkdir");
        std::fs::write(root.join("hello.txt"), "hello").expect("write");
        root
    }

    #[test]
    fn init_announces_and_lists_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let mut announced = None;

        let id = engine
            .init(&rootfs(dir.path()), |id| announced = Some(id.clone()))
            .expect("init");

        assert_eq!(announced.as_ref(), Some(&id));
        let images = engine.images().expect("images");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, id);
        assert!(engine.registry().path(&id).join("hello.txt").is_file());
    }

    #[test]
    fn init_of_file_allocates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let file = dir.path().join("plain");
        std::fs::write(&file, "x").expect("write");

        let err = engine.init(&file, |_| panic!("announced")).unwrap_err();
        assert!(matches!(err, BunkerError::Validation { .. }));
        assert!(engine.images().expect("images").is_empty());
    }

    #[test]
    fn failed_pull_removes_partial_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let client = HubClient::with_endpoints("http://127.0.0.1:9/token", "http://127.0.0.1:9/v2")
            .expect("client");
        let reference = ImageReference::parse("alpine").expect("reference");
        let mut announced = None;

        let err = engine
            .pull_from(&client, &reference, |id| announced = Some(id.clone()))
            .unwrap_err();

        assert!(matches!(err, BunkerError::Registry { .. }), "{err}");
        let id = announced.expect("id announced before download");
        assert!(!engine.registry().exists(&id));
        assert!(engine.images().expect("images").is_empty());
    }

    #[test]
    fn rmi_rejects_containers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");

        let err = engine.rmi(&container.to_string()).unwrap_err();
        assert!(matches!(err, BunkerError::WrongMode { .. }));
        assert!(engine.registry().exists(&container));
    }

    #[test]
    fn run_without_command_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");

        assert!(engine.run(&image.to_string(), &[], |_| panic!("announced")).is_err());
        assert!(engine.ps().expect("ps").is_empty());
    }

    #[test]
    fn ps_reports_stopped_container_with_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");
        engine
            .registry()
            .write_command(&container, &["/bin/echo".to_string(), "hi".to_string()])
            .expect("command");

        let rows = engine.ps().expect("ps");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.id, container);
        assert_eq!(rows[0].entry.source, image.to_string());
        assert_eq!(rows[0].entry.command.as_deref(), Some("/bin/echo hi"));
        assert_eq!(rows[0].status, ContainerStatus::Stopped);
    }

    #[test]
    fn exec_needs_a_running_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");

        let err = engine
            .exec(&container.to_string(), &["ls".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("not running"), "{err}");
        assert!(engine.exec("process_missing", &["ls".to_string()]).unwrap_err().is_not_found());
    }

    #[test]
    fn logs_stream_the_container_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");
        std::fs::write(engine.registry().log_path(&container), "hi\n").expect("log");

        let mut out = Vec::new();
        let _ = engine.logs(&container.to_string(), &mut out).expect("logs");
        assert_eq!(out, b"hi\n");
        assert!(engine.logs(&image.to_string(), &mut out).is_err());
    }

    #[test]
    fn rm_removes_container_but_not_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");

        let _ = engine.rm(&container.to_string()).expect("rm");
        assert!(engine.ps().expect("ps").is_empty());
        assert!(engine.registry().exists(&image));
        assert!(engine.rm(&container.to_string()).unwrap_err().is_not_found());
    }

    #[test]
    fn commit_replaces_image_content_and_keeps_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let root = rootfs(dir.path());
        let image = engine.init(&root, |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");

        let container_path = engine.registry().path(&container);
        std::fs::remove_file(container_path.join("hello.txt")).expect("rm");
        std::fs::write(container_path.join("added.txt"), "new").expect("write");

        let committed = engine
            .commit(&container.to_string(), &image.to_string())
            .expect("commit");
        assert_eq!(committed, image);

        let image_path = engine.registry().path(&image);
        assert!(!image_path.join("hello.txt").exists());
        assert_eq!(
            std::fs::read_to_string(image_path.join("added.txt")).expect("read"),
            "new"
        );
        assert_eq!(
            engine.registry().read_source(&image).as_deref(),
            Some(root.display().to_string().as_str())
        );
    }

    #[test]
    fn commit_into_missing_image_keeps_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = engine.init(&rootfs(dir.path()), |_| {}).expect("init");
        let container = engine.create_container(&image.to_string()).expect("create");

        let err = engine
            .commit(&container.to_string(), "image_missing")
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.registry().exists(&container));
        assert!(engine.registry().exists(&image));
    }
}
