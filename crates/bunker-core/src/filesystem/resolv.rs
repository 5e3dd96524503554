//! Minimal DNS configuration for new containers.

use std::io::Write;
use std::path::Path;

use bunker_common::error::{BunkerError, Result};

/// Appends a `nameserver` line for `server` to the resolver config at `path`.
///
/// The file is created if the image does not ship one.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_nameserver(path: &Path, server: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BunkerError::io(path, e))?;
    writeln!(file, "nameserver {server}").map_err(|e| BunkerError::io(path, e))?;
    tracing::debug!(server, "fallback nameserver appended");
    Ok(())
}
