//! Remote image sources.
//!
//! Pulls official images from Docker Hub: an anonymous pull token from the
//! auth service, the schema-2 manifest for the requested tag, then every
//! layer blob in manifest order, digest-checked and unpacked into the target.

use std::path::Path;

use bunker_common::constants;
use bunker_common::error::{BunkerError, Result};
use serde::Deserialize;

use crate::hash::HashingReader;
use crate::layer::{self, Compression};

const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DEFAULT_TAG: &str = "latest";

/// An official-library image name with its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository under `library/`.
    pub name: String,
    /// Tag, `latest` unless given.
    pub tag: String,
}

impl ImageReference {
    /// Parses `name` or `name:tag`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Validation` if either part is empty or contains
    /// characters a registry would reject.
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, tag) = raw.split_once(':').unwrap_or((raw, DEFAULT_TAG));
        let name_ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c));
        let tag_ok = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c));
        if !name_ok || !tag_ok {
            return Err(BunkerError::Validation {
                message: format!("invalid image name {raw:?}"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// A content descriptor from an image manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Blob media type.
    pub media_type: String,
    /// `sha256:` digest of the blob.
    pub digest: String,
    /// Blob size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// The subset of a schema-2 image manifest needed to fetch layers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Must be 2.
    pub schema_version: u32,
    /// Layers, bottom first.
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Decodes and checks a manifest body.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Registry` if the body is not a schema-2 manifest.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(body).map_err(|e| BunkerError::Registry {
            message: format!("unreadable manifest: {e}"),
        })?;
        if manifest.schema_version != 2 {
            return Err(BunkerError::Registry {
                message: format!("unsupported manifest schema {}", manifest.schema_version),
            });
        }
        Ok(manifest)
    }
}

fn registry_error(context: &str) -> impl FnOnce(reqwest::Error) -> BunkerError + '_ {
    move |e| BunkerError::Registry {
        message: format!("{context}: {e}"),
    }
}

/// Blocking Docker Hub client.
#[derive(Debug)]
pub struct HubClient {
    http: reqwest::blocking::Client,
    auth_url: String,
    library_url: String,
}

impl HubClient {
    /// Creates a client for the public Docker Hub endpoints.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Registry` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_endpoints(constants::REGISTRY_AUTH_URL, constants::REGISTRY_LIBRARY_URL)
    }

    /// Creates a client for alternative auth and registry endpoints.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Registry` if the HTTP client cannot be built.
    pub fn with_endpoints(auth_url: impl Into<String>, library_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("bunker/", env!("CARGO_PKG_VERSION")))
            // Layer downloads can take far longer than the default 30s.
            .timeout(Option::<std::time::Duration>::None)
            .build()
            .map_err(registry_error("cannot build HTTP client"))?;
        Ok(Self {
            http,
            auth_url: auth_url.into(),
            library_url: library_url.into(),
        })
    }

    fn token(&self, image: &ImageReference) -> Result<String> {
        let scope = format!("repository:library/{}:pull", image.name);
        let response: TokenResponse = self
            .http
            .get(&self.auth_url)
            .query(&[("service", "registry.docker.io"), ("scope", scope.as_str())])
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(registry_error("token request failed"))?
            .json()
            .map_err(registry_error("unreadable token response"))?;
        Ok(response.token)
    }

    /// Fetches the manifest of `image`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Registry` on any HTTP or decoding failure.
    pub fn manifest(&self, image: &ImageReference, token: &str) -> Result<Manifest> {
        let url = format!("{}/{}/manifests/{}", self.library_url, image.name, image.tag);
        let body = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, MANIFEST_V2)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(registry_error("manifest request failed"))?
            .bytes()
            .map_err(registry_error("manifest download failed"))?;
        Manifest::from_json(&body)
    }

    /// Downloads every layer of `image` and unpacks them into `target`.
    ///
    /// Returns the number of layers applied. A failure leaves `target`
    /// partially populated; the caller removes it.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Registry` on HTTP or digest failures, and an
    /// I/O error if a layer cannot be written.
    pub fn pull(&self, image: &ImageReference, target: &Path) -> Result<usize> {
        tracing::info!(image = %image, target = %target.display(), "pulling image");
        let token = self.token(image)?;
        let manifest = self.manifest(image, &token)?;
        for (index, descriptor) in manifest.layers.iter().enumerate() {
            tracing::info!(
                layer = index,
                digest = %descriptor.digest,
                size = descriptor.size,
                "fetching layer"
            );
            let url = format!("{}/{}/blobs/{}", self.library_url, image.name, descriptor.digest);
            let response = self
                .http
                .get(url)
                .bearer_auth(&token)
                .send()
                .and_then(reqwest::blocking::Response::error_for_status)
                .map_err(registry_error("blob request failed"))?;
            let (reader, stats) = layer::unpack(
                HashingReader::new(response),
                Compression::from_media_type(&descriptor.media_type),
                target,
            )?;
            let _ = reader.verify(&descriptor.digest)?;
            tracing::debug!(layer = index, ?stats, "layer applied");
        }
        tracing::info!(image = %image, layers = manifest.layers.len(), "image pulled");
        Ok(manifest.layers.len())
    }
}
