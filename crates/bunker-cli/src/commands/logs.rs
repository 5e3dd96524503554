//! `bunker logs`: Print the output log of a container.

use bunker_runtime::engine::Engine;
use clap::Args;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or its log cannot be
/// read.
pub fn execute(args: LogsArgs, engine: &Engine) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    let bytes = engine.logs(&args.container, &mut out)?;
    tracing::debug!(container = %args.container, bytes, "log streamed");
    Ok(())
}
