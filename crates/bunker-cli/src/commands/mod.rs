//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod images;
pub mod init;
pub mod logs;
pub mod ps;
pub mod pull;
pub mod rm;
pub mod rmi;
pub mod run;
pub mod stage;

use std::path::PathBuf;

use anyhow::Context;
use bunker_common::config::BunkerConfig;
use bunker_common::constants;
use bunker_runtime::engine::Engine;
use clap::{Parser, Subcommand};
use ipnetwork::Ipv4Network;

/// bunker: a minimal container runtime on btrfs snapshots and Linux namespaces.
#[derive(Parser, Debug)]
#[command(name = constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding image and container snapshots.
    #[arg(long, global = true, env = "BUNKER_STORE", default_value = constants::DEFAULT_STORE_DIR)]
    pub store: PathBuf,

    /// Host bridge container network links are attached to.
    #[arg(long, global = true, env = "BUNKER_BRIDGE", default_value = constants::DEFAULT_BRIDGE)]
    pub bridge: String,

    /// Mount point of the cgroup v1 controllers.
    #[arg(long, global = true, env = "BUNKER_CGROUP_ROOT", default_value = constants::CGROUP_V1_PATH)]
    pub cgroup_root: PathBuf,

    /// Subnet of the bridge that container addresses are drawn from.
    #[arg(
        long,
        global = true,
        env = "BUNKER_SUBNET",
        default_value = constants::DEFAULT_SUBNET,
        value_parser = BunkerConfig::parse_subnet
    )]
    pub subnet: Ipv4Network,

    /// Emit diagnostics as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Runtime configuration with the global flags applied.
    #[must_use]
    pub fn config(&self) -> BunkerConfig {
        BunkerConfig {
            store_dir: self.store.clone(),
            bridge: self.bridge.clone(),
            cgroup_root: self.cgroup_root.clone(),
            subnet: self.subnet,
            ..BunkerConfig::default()
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an image from a local directory.
    Init(init::InitArgs),
    /// Pull an official image from Docker Hub.
    Pull(pull::PullArgs),
    /// Remove an image.
    Rmi(rmi::RmiArgs),
    /// List images.
    Images,
    /// List containers.
    Ps,
    /// Create a container from an image and run a command in it.
    Run(run::RunArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Print the output log of a container.
    Logs(logs::LogsArgs),
    /// Remove a container.
    Rm(rm::RmArgs),
    /// Replace an image with the state of a container.
    Commit(commit::CommitArgs),
    /// Internal: set up a new container in fresh namespaces.
    #[command(hide = true)]
    Bootstrap(stage::StageArgs),
    /// Internal: join a running container.
    #[command(hide = true)]
    Attach(stage::StageArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// Returns the process exit code.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config();
    let engine = Engine::new(config)
        .with_context(|| format!("cannot open snapshot store {}", cli.store.display()))?;
    match cli.command {
        Command::Init(args) => init::execute(args, &engine).map(|()| 0),
        Command::Pull(args) => pull::execute(args, &engine).map(|()| 0),
        Command::Rmi(args) => rmi::execute(args, &engine).map(|()| 0),
        Command::Images => images::execute(&engine).map(|()| 0),
        Command::Ps => ps::execute(&engine).map(|()| 0),
        Command::Run(args) => run::execute(args, &engine),
        Command::Exec(args) => exec::execute(args, &engine),
        Command::Logs(args) => logs::execute(args, &engine).map(|()| 0),
        Command::Rm(args) => rm::execute(args, &engine).map(|()| 0),
        Command::Commit(args) => commit::execute(args, &engine).map(|()| 0),
        Command::Bootstrap(args) => stage::bootstrap(args, &engine),
        Command::Attach(args) => stage::attach(args, &engine),
    }
}
