//! # Version Resolution
//!
//! Works out which version of a resource is current. A live probe of the
//! remote side is preferred; when it fails, the newest cached version stands
//! in, and when there is none either the result is [`Version::UNKNOWN`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{Resource, Version, VersionedCacheStore};
use crate::transport::{Transport, TransportError};

/// How the current version of a resource is determined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionStrategy {
    /// Fingerprint of the URL and the remote content length
    #[default]
    ContentLength,
    /// Fingerprint of a manifest fetched from `url + suffix`
    Manifest { suffix: String },
}

impl VersionStrategy {
    pub fn manifest(suffix: impl Into<String>) -> Self {
        VersionStrategy::Manifest {
            suffix: suffix.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VersionResolver {
    store: Option<Arc<VersionedCacheStore>>,
}

impl VersionResolver {
    /// Resolver falling back to `store`; without one, failed probes yield the sentinel
    pub fn new(store: Option<Arc<VersionedCacheStore>>) -> Self {
        Self { store }
    }

    /// Current version of `resource`. Never fails.
    pub async fn resolve(
        &self,
        resource: &Resource,
        transport: &dyn Transport,
        strategy: &VersionStrategy,
    ) -> Version {
        match probe(resource, transport, strategy).await {
            Ok(version) => {
                debug!(url = %resource.url(), version = %version, "Resolved remote version");
                version
            }
            Err(e) => {
                let Some(store) = &self.store else {
                    warn!(url = %resource.url(), error = %e, "Version probe failed");
                    return Version::UNKNOWN;
                };

                let cached = store.latest_version(resource.key()).await;
                warn!(
                    url = %resource.url(),
                    error = %e,
                    cached = %cached,
                    "Version probe failed, falling back to cache"
                );
                cached
            }
        }
    }
}

async fn probe(
    resource: &Resource,
    transport: &dyn Transport,
    strategy: &VersionStrategy,
) -> Result<Version, TransportError> {
    match strategy {
        VersionStrategy::ContentLength => {
            let size = transport.fetch_size(resource.url()).await?;
            Ok(Version::from_content_length(resource.url().as_str(), size))
        }
        VersionStrategy::Manifest { suffix } => {
            let manifest_url = resource
                .sibling(suffix)
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
            let manifest = transport
                .fetch_bytes(&manifest_url, &CancellationToken::new(), &|_| {})
                .await?;
            Ok(Version::from_manifest(&manifest))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cache::UnlimitedSpace;
    use crate::test_utils::MockTransport;

    const URL: &str = "https://cdn.example.com/a.bin";

    fn store(dir: &tempfile::TempDir) -> Arc<VersionedCacheStore> {
        Arc::new(VersionedCacheStore::with_space_probe(
            dir.path(),
            Arc::new(UnlimitedSpace),
        ))
    }

    #[tokio::test]
    async fn test_resolve_from_content_length() {
        let transport = MockTransport::new().with_resource(URL, b"hello");
        let resolver = VersionResolver::new(None);
        let resource = Resource::parse(URL).unwrap();

        let version = resolver
            .resolve(&resource, &transport, &VersionStrategy::ContentLength)
            .await;
        assert_eq!(version, Version::from_content_length(URL, 5));
    }

    #[tokio::test]
    async fn test_resolve_from_manifest() {
        let transport = MockTransport::new()
            .with_resource(URL, b"payload")
            .with_resource("https://cdn.example.com/a.bin.manifest", b"Hash: 1234");
        let resolver = VersionResolver::new(None);
        let resource = Resource::parse(URL).unwrap();

        let version = resolver
            .resolve(&resource, &transport, &VersionStrategy::manifest(".manifest"))
            .await;
        assert_eq!(version, Version::from_manifest(b"Hash: 1234"));
    }

    #[tokio::test]
    async fn test_offline_falls_back_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let resource = Resource::parse(URL).unwrap();
        let cached = Version::from_content_length(URL, 5);
        store
            .write(&resource, &cached, &Bytes::from_static(b"hello"), true)
            .await
            .unwrap();

        let transport = MockTransport::new().with_resource(URL, b"hello!");
        transport.set_offline(true);
        let resolver = VersionResolver::new(Some(Arc::clone(&store)));

        let version = resolver
            .resolve(&resource, &transport, &VersionStrategy::ContentLength)
            .await;
        assert_eq!(version, cached);
        assert!(store.is_cached(&resource, &version).await);
    }

    #[tokio::test]
    async fn test_offline_without_cache_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.set_offline(true);
        let resource = Resource::parse(URL).unwrap();

        let with_store = VersionResolver::new(Some(store(&dir)));
        assert_eq!(
            with_store
                .resolve(&resource, &transport, &VersionStrategy::ContentLength)
                .await,
            Version::UNKNOWN
        );

        let without_store = VersionResolver::new(None);
        assert_eq!(
            without_store
                .resolve(&resource, &transport, &VersionStrategy::manifest(".manifest"))
                .await,
            Version::UNKNOWN
        );
    }
}
