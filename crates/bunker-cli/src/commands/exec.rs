//! `bunker exec`: Run a command inside a running container.

use bunker_runtime::engine::Engine;
use clap::Args;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Joins the container's namespaces and control group and runs the
/// command with the caller's stdio. Returns the command's exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or cannot be joined.
pub fn execute(args: ExecArgs, engine: &Engine) -> anyhow::Result<i32> {
    Ok(engine.exec(&args.container, &args.command)?)
}
