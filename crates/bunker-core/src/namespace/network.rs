//! Network namespace isolation.
//!
//! A container's network namespace is created detached: the caller spawns it,
//! keeps a handle, and steps straight back into its own namespace so the new
//! one can be configured by handle.

use bunker_common::error::Result;

use super::{Namespace, NamespaceFile};

/// Creates an empty network namespace without staying in it.
///
/// Returns the caller's original namespace and the new one, in that order.
/// The caller is back in its original namespace whether or not this succeeds.
///
/// # Errors
///
/// Returns an error if the namespace cannot be created, opened, or left.
pub fn create_detached() -> Result<(NamespaceFile, NamespaceFile)> {
    let original = NamespaceFile::current(Namespace::Net)?;
    super::create(&[Namespace::Net])?;
    let created = NamespaceFile::current(Namespace::Net);
    let restored = original.enter();
    let created = created?;
    restored?;
    tracing::debug!("network namespace created");
    Ok((original, created))
}
