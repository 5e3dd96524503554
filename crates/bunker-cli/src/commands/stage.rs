//! Hidden sub-commands the runtime re-executes itself with.

use bunker_runtime::engine::Engine;
use clap::Args;

/// Positional arguments shared by `bootstrap` and `attach`.
#[derive(Args, Debug)]
pub struct StageArgs {
    /// Container ID.
    pub id: String,

    /// Command to run, after `--`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `bootstrap` stage of `run`.
///
/// # Errors
///
/// Returns an error if the container cannot be set up.
pub fn bootstrap(args: StageArgs, engine: &Engine) -> anyhow::Result<i32> {
    Ok(engine.bootstrap(&args.id, args.command)?)
}

/// Executes the `attach` stage of `exec`.
///
/// # Errors
///
/// Returns an error if the container cannot be joined.
pub fn attach(args: StageArgs, engine: &Engine) -> anyhow::Result<i32> {
    Ok(engine.attach(&args.id, args.command)?)
}
