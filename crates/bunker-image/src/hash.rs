//! SHA-256 content verification.
//!
//! Registry blobs are addressed by `sha256:<hex>` digests. Layers are hashed
//! while they stream through the extractor and checked once fully read.

use std::fmt::Write as _;
use std::io::{self, Read};

use bunker_common::error::{BunkerError, Result};
use sha2::{Digest, Sha256};

const SHA256_PREFIX: &str = "sha256:";

/// Extracts the hex part of a `sha256:` digest, normalised to lower case.
///
/// # Errors
///
/// Returns `BunkerError::Registry` if the digest uses another algorithm or
/// is not 64 hex characters.
pub fn parse_digest(digest: &str) -> Result<String> {
    let hex = digest.strip_prefix(SHA256_PREFIX).ok_or_else(|| BunkerError::Registry {
        message: format!("unsupported digest algorithm: {digest}"),
    })?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BunkerError::Registry {
            message: format!("malformed digest: {digest}"),
        });
    }
    Ok(hex.to_ascii_lowercase())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// A reader that hashes everything read through it.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Reads whatever is left, then checks the hash against `digest`.
    ///
    /// Returns the number of bytes hashed.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Registry` if the stream fails or the hash differs.
    pub fn verify(mut self, digest: &str) -> Result<u64> {
        let expected = parse_digest(digest)?;
        let _ = io::copy(&mut self, &mut io::sink()).map_err(|e| BunkerError::Registry {
            message: format!("blob {digest} truncated: {e}"),
        })?;
        let actual = to_hex(&self.hasher.finalize());
        if actual != expected {
            return Err(BunkerError::Registry {
                message: format!("digest mismatch: expected {expected}, got {actual}"),
            });
        }
        tracing::debug!(digest, bytes = self.bytes, "blob digest verified");
        Ok(self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}
