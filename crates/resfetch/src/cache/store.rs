//! # Versioned Cache Store
//!
//! Persists fetched payloads under `root/<key>/<version>/<file name>`.
//!
//! Writes go to a hidden temporary file in the version directory and are then
//! renamed into place, so a reader either sees the whole payload or nothing.
//! The store assumes a single writer per `(key, version)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, warn};

use super::error::StoreError;
use super::space::{DiskSpaceProbe, SpaceProbe};
use super::types::{Resource, ResourceKey, Version};

#[derive(Debug, Clone)]
pub struct VersionedCacheStore {
    root: PathBuf,
    space: Arc<dyn SpaceProbe>,
}

impl VersionedCacheStore {
    /// Store rooted at `root`, checking free space against the real disks
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_space_probe(root, Arc::new(DiskSpaceProbe))
    }

    pub fn with_space_probe(root: impl Into<PathBuf>, space: Arc<dyn SpaceProbe>) -> Self {
        Self {
            root: root.into(),
            space,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every cached version of a resource
    pub fn resource_dir(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(key.to_string())
    }

    /// Location of the payload for one version of a resource
    pub fn entry_path(&self, resource: &Resource, version: &Version) -> PathBuf {
        self.resource_dir(resource.key())
            .join(version.to_string())
            .join(resource.file_name())
    }

    pub async fn is_cached(&self, resource: &Resource, version: &Version) -> bool {
        if !version.is_known() {
            return false;
        }

        fs::metadata(self.entry_path(resource, version))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn read(&self, resource: &Resource, version: &Version) -> Result<Bytes, StoreError> {
        let path = self.entry_path(resource, version);

        if !version.is_known() || !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound {
                key: *resource.key(),
                version: *version,
            });
        }

        let data = fs::read(&path).await?;
        debug!(path = %path.display(), size = data.len(), "Read cached entry");
        Ok(Bytes::from(data))
    }

    /// Persist `data` as `version` of `resource` and return the entry path.
    ///
    /// With `evict_others`, every other version directory of the resource is
    /// removed before writing. Eviction failures are logged and ignored.
    pub async fn write(
        &self,
        resource: &Resource,
        version: &Version,
        data: &Bytes,
        evict_others: bool,
    ) -> Result<PathBuf, StoreError> {
        self.ensure_space(data.len() as u64).await?;

        if evict_others {
            self.evict_except(resource.key(), version).await;
        }

        let path = self.entry_path(resource, version);
        let Some(dir) = path.parent() else {
            return Err(std::io::Error::other("entry path has no parent directory").into());
        };
        fs::create_dir_all(dir).await?;

        let temp_path = dir.join(format!(".{}.tmp", resource.file_name()));
        let written = match fs::write(&temp_path, data).await {
            Ok(()) => fs::rename(&temp_path, &path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(
            path = %path.display(),
            size = data.len(),
            "Wrote cache entry"
        );
        Ok(path)
    }

    /// Most recently modified cached version of a resource.
    ///
    /// Every other version directory found is deleted. Returns
    /// [`Version::UNKNOWN`] when nothing usable is cached.
    pub async fn latest_version(&self, key: &ResourceKey) -> Version {
        let dir = self.resource_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "Failed to scan resource directory");
                }
                return Version::UNKNOWN;
            }
        };

        let mut versions: Vec<(SystemTime, Version)> = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to read resource directory entry");
                    break;
                }
            };

            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<Version>().ok())
                .filter(Version::is_known)
            else {
                continue;
            };

            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            versions.push((modified, version));
        }

        let Some(&(_, latest)) = versions.iter().max() else {
            return Version::UNKNOWN;
        };

        for (_, stale) in versions.iter().filter(|(_, v)| *v != latest) {
            let stale_dir = dir.join(stale.to_string());
            match fs::remove_dir_all(&stale_dir).await {
                Ok(()) => debug!(path = %stale_dir.display(), "Removed stale version"),
                Err(e) => {
                    warn!(path = %stale_dir.display(), error = %e, "Failed to remove stale version")
                }
            }
        }

        latest
    }

    /// Delete every cached version of one resource.
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        let dir = self.resource_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every cached resource, returning how many were removed
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ensure_space(&self, required: u64) -> Result<(), StoreError> {
        let space = Arc::clone(&self.space);
        let root = self.root.clone();
        let probed = tokio::task::spawn_blocking(move || space.available_bytes(&root)).await;

        match probed {
            Ok(Ok(available)) if available <= required => {
                Err(StoreError::InsufficientSpace {
                    required,
                    available,
                })
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!(root = %self.root.display(), error = %e, "Free space probe failed, writing anyway");
                Ok(())
            }
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Free space probe panicked, writing anyway");
                Ok(())
            }
        }
    }

    async fn evict_except(&self, key: &ResourceKey, keep: &Version) {
        let dir = self.resource_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let keep = keep.to_string();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_str() == Some(keep.as_str()) {
                continue;
            }

            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let removed = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };

            match removed {
                Ok(()) => debug!(path = %path.display(), "Evicted stale version"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict stale version"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::space::{FixedSpace, UnlimitedSpace};

    fn store_in(dir: &Path) -> VersionedCacheStore {
        VersionedCacheStore::with_space_probe(dir, Arc::new(UnlimitedSpace))
    }

    fn resource() -> Resource {
        Resource::parse("https://cdn.example.com/assets/a.bin").unwrap()
    }

    fn version_dirs(store: &VersionedCacheStore, key: &ResourceKey) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(store.resource_dir(key))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn set_mtime(dir: &Path, time: SystemTime) {
        std::fs::File::open(dir).unwrap().set_modified(time).unwrap();
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();
        let v1 = Version::from_content_length(res.url().as_str(), 5);

        assert!(!store.is_cached(&res, &v1).await);

        let path = store
            .write(&res, &v1, &Bytes::from_static(b"hello"), true)
            .await
            .unwrap();
        assert_eq!(path, store.entry_path(&res, &v1));
        assert!(path.ends_with(format!("{}/{}/a.bin", res.key(), v1)));

        assert!(store.is_cached(&res, &v1).await);
        assert_eq!(store.read(&res, &v1).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_read_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();
        let v1 = Version::from_content_length(res.url().as_str(), 5);

        assert!(matches!(
            store.read(&res, &v1).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(!store.is_cached(&res, &Version::UNKNOWN).await);
    }

    #[tokio::test]
    async fn test_idempotent_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();
        let v1 = Version::from_content_length(res.url().as_str(), 5);
        let data = Bytes::from_static(b"hello");

        store.write(&res, &v1, &data, true).await.unwrap();
        let first = store.read(&res, &v1).await.unwrap();
        store.write(&res, &v1, &data, true).await.unwrap();
        let second = store.read(&res, &v1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(version_dirs(&store, res.key()), vec![v1.to_string()]);
        // No temporary file is left next to the payload
        let files: Vec<_> = std::fs::read_dir(store.resource_dir(res.key()).join(v1.to_string()))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_write_evicts_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();
        let v1 = Version::from_content_length(res.url().as_str(), 5);
        let v2 = Version::from_content_length(res.url().as_str(), 6);

        store
            .write(&res, &v1, &Bytes::from_static(b"hello"), true)
            .await
            .unwrap();
        store
            .write(&res, &v2, &Bytes::from_static(b"hello!"), true)
            .await
            .unwrap();

        assert_eq!(version_dirs(&store, res.key()), vec![v2.to_string()]);
        assert_eq!(store.latest_version(res.key()).await, v2);
    }

    #[tokio::test]
    async fn test_write_keeps_other_versions_without_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();
        let v1 = Version::from_content_length(res.url().as_str(), 5);
        let v2 = Version::from_content_length(res.url().as_str(), 6);

        store
            .write(&res, &v1, &Bytes::from_static(b"hello"), false)
            .await
            .unwrap();
        store
            .write(&res, &v2, &Bytes::from_static(b"hello!"), false)
            .await
            .unwrap();

        assert_eq!(version_dirs(&store, res.key()).len(), 2);
    }

    #[tokio::test]
    async fn test_latest_version_prefers_newest_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();
        let old = Version::from_content_length(res.url().as_str(), 1);
        let new = Version::from_content_length(res.url().as_str(), 2);

        store.write(&res, &new, &Bytes::from_static(b"22"), false).await.unwrap();
        store.write(&res, &old, &Bytes::from_static(b"1"), false).await.unwrap();

        let now = SystemTime::now();
        set_mtime(&store.resource_dir(res.key()).join(old.to_string()), now - Duration::from_secs(3600));
        set_mtime(&store.resource_dir(res.key()).join(new.to_string()), now);

        // Junk that must be ignored
        std::fs::create_dir_all(store.resource_dir(res.key()).join("not-a-version")).unwrap();
        std::fs::write(store.resource_dir(res.key()).join("stray.txt"), b"x").unwrap();

        assert_eq!(store.latest_version(res.key()).await, new);
        assert!(!store.resource_dir(res.key()).join(old.to_string()).exists());
        assert!(store.is_cached(&res, &new).await);
    }

    #[tokio::test]
    async fn test_latest_version_of_unknown_resource() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let res = resource();

        assert_eq!(store.latest_version(res.key()).await, Version::UNKNOWN);
    }

    #[tokio::test]
    async fn test_insufficient_space() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedCacheStore::with_space_probe(dir.path(), Arc::new(FixedSpace(4)));
        let res = resource();
        let v1 = Version::from_content_length(res.url().as_str(), 5);

        let err = store
            .write(&res, &v1, &Bytes::from_static(b"hello"), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientSpace {
                required: 5,
                available: 4
            }
        ));
        assert!(!store.is_cached(&res, &v1).await);

        // Exactly the payload size is still not enough
        let store = VersionedCacheStore::with_space_probe(dir.path(), Arc::new(FixedSpace(5)));
        assert!(store.write(&res, &v1, &Bytes::from_static(b"hello"), true).await.is_err());

        let store = VersionedCacheStore::with_space_probe(dir.path(), Arc::new(FixedSpace(6)));
        assert!(store.write(&res, &v1, &Bytes::from_static(b"hello"), true).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir.path().join("cache"));
        let a = resource();
        let b = Resource::parse("https://cdn.example.com/assets/b.bin").unwrap();
        let va = Version::from_content_length(a.url().as_str(), 1);
        let vb = Version::from_content_length(b.url().as_str(), 1);

        assert_eq!(store.clear().await.unwrap(), 0);

        store.write(&a, &va, &Bytes::from_static(b"a"), true).await.unwrap();
        store.write(&b, &vb, &Bytes::from_static(b"b"), true).await.unwrap();

        assert!(store.remove(a.key()).await.unwrap());
        assert!(!store.remove(a.key()).await.unwrap());
        assert!(!store.is_cached(&a, &va).await);
        assert!(store.is_cached(&b, &vb).await);

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(!store.is_cached(&b, &vb).await);
    }
}
