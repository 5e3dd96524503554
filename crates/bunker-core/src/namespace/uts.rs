//! UTS namespace isolation.
//!
//! Allows the container to have its own hostname.

use bunker_common::error::{BunkerError, Result};

/// Sets the hostname inside the current UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname)
        .map_err(|e| BunkerError::namespace(format!("sethostname {hostname:?} failed: {e}")))?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}
