//! `bunker pull`: Pull an official image from Docker Hub.

use bunker_runtime::engine::Engine;
use clap::Args;

use crate::output;

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image name, optionally with a tag (`alpine`, `debian:bookworm`).
    pub image: String,
}

/// Executes the `pull` command.
///
/// Prints the new image ID before downloading its layers.
///
/// # Errors
///
/// Returns an error if the name is invalid or any download step fails.
pub fn execute(args: PullArgs, engine: &Engine) -> anyhow::Result<()> {
    let mut printed = Ok(());
    let _ = engine.pull(&args.image, |id| printed = output::line(id))?;
    printed
}
