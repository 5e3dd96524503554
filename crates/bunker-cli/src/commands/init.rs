//! `bunker init`: Create an image from a local directory.

use std::path::PathBuf;

use bunker_runtime::engine::Engine;
use clap::Args;

use crate::output;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory whose contents become the image's root filesystem.
    pub dir: PathBuf,
}

/// Executes the `init` command.
///
/// Prints the new image ID, then copies the directory into it.
///
/// # Errors
///
/// Returns an error if the path is not a directory or the copy fails.
pub fn execute(args: InitArgs, engine: &Engine) -> anyhow::Result<()> {
    let mut printed = Ok(());
    let _ = engine.init(&args.dir, |id| printed = output::line(id))?;
    printed
}
