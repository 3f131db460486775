//! # Cache Types
//!
//! Identity types shared by the store, the resolver and the fetch queue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::FetchError;

/// Fingerprints are 128-bit prefixes of a SHA-256 digest
const FINGERPRINT_LEN: usize = 16;

/// Filename used when the URL path has no usable last segment
const FALLBACK_FILE_NAME: &str = "resource";

fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> [u8; FINGERPRINT_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&digest[..FINGERPRINT_LEN]);
    out
}

/// Stable identity of a downloadable resource, derived from its URL.
///
/// Rendered as lowercase hex, it names the resource's cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey([u8; FINGERPRINT_LEN]);

impl ResourceKey {
    pub fn from_url(url: &str) -> Self {
        Self(fingerprint([url.as_bytes()]))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Content fingerprint of a resource.
///
/// The all-zero value is the "unknown version" sentinel; it never names a
/// cache directory and always means the resource must be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version([u8; FINGERPRINT_LEN]);

impl Version {
    pub const UNKNOWN: Version = Version([0; FINGERPRINT_LEN]);

    /// Fingerprint of a URL together with the size of its content
    pub fn from_content_length(url: &str, size: u64) -> Self {
        let size = size.to_string();
        Self(fingerprint([url.as_bytes(), size.as_bytes()]))
    }

    /// Fingerprint of a manifest describing the resource
    pub fn from_manifest(manifest: &[u8]) -> Self {
        Self(fingerprint([manifest]))
    }

    pub fn is_known(&self) -> bool {
        *self != Self::UNKNOWN
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version string: {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s, &mut out).map_err(|_| ParseVersionError(s.to_string()))?;
        Ok(Self(out))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A parsed resource URL with its derived cache identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    url: Url,
    key: ResourceKey,
    file_name: String,
}

impl Resource {
    pub fn parse(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::from_url(url))
    }

    pub fn from_url(url: Url) -> Self {
        let key = ResourceKey::from_url(url.as_str());
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());

        Self {
            url,
            key,
            file_name,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Name of the payload file inside the version directory
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// URL formed by appending `suffix` to this resource's URL
    pub fn sibling(&self, suffix: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}{suffix}", self.url))
    }
}
