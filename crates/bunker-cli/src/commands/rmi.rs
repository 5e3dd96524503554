//! `bunker rmi`: Remove an image.

use bunker_runtime::engine::Engine;
use clap::Args;

/// Arguments for the `rmi` command.
#[derive(Args, Debug)]
pub struct RmiArgs {
    /// Image ID.
    pub image: String,
}

/// Executes the `rmi` command.
///
/// # Errors
///
/// Returns an error if the ID does not name an existing image.
pub fn execute(args: RmiArgs, engine: &Engine) -> anyhow::Result<()> {
    let id = engine.rmi(&args.image)?;
    tracing::info!(id = %id, "image removed");
    Ok(())
}
