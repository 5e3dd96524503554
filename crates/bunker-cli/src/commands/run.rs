//! `bunker run`: Create a container from an image and run a command in it.

use bunker_runtime::engine::Engine;
use clap::Args;

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image ID to snapshot.
    pub image: String,

    /// Command to run, with its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// Prints the container ID, then blocks until the command exits. Returns
/// the command's exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be created, started, or torn
/// down.
pub fn execute(args: RunArgs, engine: &Engine) -> anyhow::Result<i32> {
    let mut printed = Ok(());
    let code = engine.run(&args.image, &args.command, |id| printed = output::line(id))?;
    printed?;
    Ok(code)
}
