//! `bunker rm`: Remove a container.

use bunker_runtime::engine::Engine;
use clap::Args;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container ID.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the ID does not name an existing container.
pub fn execute(args: RmArgs, engine: &Engine) -> anyhow::Result<()> {
    let id = engine.rm(&args.container)?;
    tracing::info!(id = %id, "container removed");
    Ok(())
}
