//! `bunker commit`: Replace an image with the state of a container.

use bunker_runtime::engine::Engine;
use clap::Args;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container ID to snapshot.
    pub container: String,

    /// Image ID to overwrite.
    pub image: String,
}

/// Executes the `commit` command.
///
/// The image's previous content is deleted first and cannot be recovered.
///
/// # Errors
///
/// Returns an error if either ID is invalid or the snapshot fails.
pub fn execute(args: CommitArgs, engine: &Engine) -> anyhow::Result<()> {
    let image = engine.commit(&args.container, &args.image)?;
    tracing::info!(container = %args.container, image = %image, "committed");
    Ok(())
}
