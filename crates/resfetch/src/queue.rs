//! # Fetch Queue
//!
//! Pending entries live in two lanes. Entries whose version is already on
//! disk (cache hits) are always dequeued before entries that need a transfer
//! (cache misses); each lane is FIFO. An entry is keyed by resource and
//! version, and a second request for the same key merges its subscribers into
//! the existing entry instead of queueing another one.
//!
//! All operations take the queue's own lock and never hold it across I/O.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;
use url::Url;

use crate::cache::{Resource, ResourceKey, Version};
use crate::request::{Subscriber, SubscriberId};
use crate::transport::Transport;
use crate::version::VersionStrategy;

/// Identity of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub key: ResourceKey,
    pub version: Version,
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.key, self.version)
    }
}

/// Where the payload of an entry comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    Remote(Url),
    Cache(PathBuf),
}

/// Everything the drain loop needs to service an entry
pub(crate) struct Job {
    pub(crate) resource: Resource,
    pub(crate) version: Version,
    pub(crate) source: FetchSource,
    pub(crate) strategy: VersionStrategy,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) progress: Arc<watch::Sender<f32>>,
}

impl Job {
    pub(crate) fn entry_key(&self) -> EntryKey {
        EntryKey {
            key: *self.resource.key(),
            version: self.version,
        }
    }
}

/// A queued entry and its subscribers
pub struct PendingRequest {
    job: Job,
    subscribers: Vec<Subscriber>,
}

impl PendingRequest {
    pub(crate) fn new(job: Job, subscriber: Subscriber) -> Self {
        Self {
            job,
            subscribers: vec![subscriber],
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.job.resource
    }

    pub fn version(&self) -> &Version {
        &self.job.version
    }

    pub fn source(&self) -> &FetchSource {
        &self.job.source
    }

    pub fn entry_key(&self) -> EntryKey {
        self.job.entry_key()
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self.job.source, FetchSource::Cache(_))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// A new receiver for this entry's progress
    pub fn progress(&self) -> watch::Receiver<f32> {
        self.job.progress.subscribe()
    }

    fn merge(&mut self, other: PendingRequest) {
        self.subscribers.extend(other.subscribers);
    }

    fn detach(&mut self, id: SubscriberId) -> Option<Subscriber> {
        let pos = self.subscribers.iter().position(|s| s.id == id)?;
        Some(self.subscribers.remove(pos))
    }

    pub(crate) fn into_parts(self) -> (Job, Vec<Subscriber>) {
        (self.job, self.subscribers)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("url", &self.job.resource.url().as_str())
            .field("version", &self.job.version)
            .field("cache_hit", &self.is_cache_hit())
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

/// Result of [`FetchQueue::add`]
#[derive(Debug)]
pub struct Enqueued {
    /// The request joined an entry that was already queued
    pub merged: bool,
    /// Progress of the entry the request ended up in
    pub progress: watch::Receiver<f32>,
}

#[derive(Default)]
struct Lanes {
    hits: VecDeque<PendingRequest>,
    misses: VecDeque<PendingRequest>,
}

impl Lanes {
    fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.hits.iter().chain(self.misses.iter())
    }

    fn find_mut(&mut self, entry: &EntryKey) -> Option<&mut PendingRequest> {
        self.hits
            .iter_mut()
            .chain(self.misses.iter_mut())
            .find(|p| p.entry_key() == *entry)
    }

    fn lane_of(&mut self, entry: &EntryKey) -> Option<(&mut VecDeque<PendingRequest>, usize)> {
        if let Some(pos) = self.hits.iter().position(|p| p.entry_key() == *entry) {
            return Some((&mut self.hits, pos));
        }
        let pos = self.misses.iter().position(|p| p.entry_key() == *entry)?;
        Some((&mut self.misses, pos))
    }
}

#[derive(Default)]
pub struct FetchQueue {
    lanes: Mutex<Lanes>,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item`, or merge its subscribers into an equal entry
    pub fn add(&self, item: PendingRequest) -> Enqueued {
        let mut lanes = self.lanes.lock();
        let entry = item.entry_key();

        if let Some(existing) = lanes.find_mut(&entry) {
            existing.merge(item);
            trace!(entry = %entry, subscribers = existing.subscriber_count(), "Merged into queued entry");
            return Enqueued {
                merged: true,
                progress: existing.progress(),
            };
        }

        let progress = item.progress();
        if item.is_cache_hit() {
            lanes.hits.push_back(item);
        } else {
            lanes.misses.push_back(item);
        }
        trace!(entry = %entry, "Queued entry");

        Enqueued {
            merged: false,
            progress,
        }
    }

    pub fn contains(&self, entry: &EntryKey) -> bool {
        self.lanes.lock().iter().any(|p| p.entry_key() == *entry)
    }

    /// Whether any queued entry resolved to `version`
    pub fn contains_version(&self, version: &Version) -> bool {
        self.lanes.lock().iter().any(|p| p.version() == version)
    }

    /// Number of queued entries (not subscribers)
    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.hits.len() + lanes.misses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in service order
    pub fn entries(&self) -> Vec<EntryKey> {
        self.lanes.lock().iter().map(PendingRequest::entry_key).collect()
    }

    /// Take the next entry to service
    pub fn dequeue(&self) -> Option<PendingRequest> {
        let mut lanes = self.lanes.lock();
        lanes.hits.pop_front().or_else(|| lanes.misses.pop_front())
    }

    /// Detach one subscriber. The entry is dropped once it has none left.
    pub(crate) fn remove(&self, entry: &EntryKey, id: SubscriberId) -> Option<Subscriber> {
        let mut lanes = self.lanes.lock();
        let (lane, pos) = lanes.lane_of(entry)?;
        let subscriber = lane[pos].detach(id)?;

        if lane[pos].subscribers.is_empty() {
            lane.remove(pos);
            trace!(entry = %entry, "Dropped queued entry without subscribers");
        }
        Some(subscriber)
    }

    /// Take every queued entry of one resource, whatever its version
    pub fn remove_resource(&self, key: &ResourceKey) -> Vec<PendingRequest> {
        let mut lanes = self.lanes.lock();
        let Lanes { hits, misses } = &mut *lanes;
        let mut removed = Vec::new();

        for lane in [hits, misses] {
            let (matching, kept): (VecDeque<_>, VecDeque<_>) =
                lane.drain(..).partition(|p| p.resource().key() == key);
            *lane = kept;
            removed.extend(matching);
        }
        removed
    }

    /// Take every queued entry
    pub fn clear(&self) -> Vec<PendingRequest> {
        let mut lanes = self.lanes.lock();
        let Lanes { hits, misses } = &mut *lanes;
        hits.drain(..).chain(misses.drain(..)).collect()
    }
}

impl fmt::Debug for FetchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lanes = self.lanes.lock();
        f.debug_struct("FetchQueue")
            .field("hits", &lanes.hits.len())
            .field("misses", &lanes.misses.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::BytesDecoder;
    use crate::test_utils::MockTransport;

    fn pending(url: &str, size: u64, cache_hit: bool, id: u64) -> PendingRequest {
        let resource = Resource::parse(url).unwrap();
        let version = Version::from_content_length(url, size);
        let source = if cache_hit {
            FetchSource::Cache(PathBuf::from("/cache").join(resource.file_name()))
        } else {
            FetchSource::Remote(resource.url().clone())
        };
        let (tx, _) = watch::channel(0.0);
        let job = Job {
            resource,
            version,
            source,
            strategy: VersionStrategy::ContentLength,
            transport: Arc::new(MockTransport::new()),
            progress: Arc::new(tx),
        };
        let (subscriber, _rx) = Subscriber::channel(SubscriberId(id), BytesDecoder);
        PendingRequest::new(job, subscriber)
    }

    fn urls(queue: &FetchQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(p) = queue.dequeue() {
            out.push(p.resource().file_name().to_string());
        }
        out
    }

    #[test]
    fn test_empty_queue() {
        let queue = FetchQueue::new();
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_hits_before_misses_and_fifo_within_lane() {
        let queue = FetchQueue::new();
        queue.add(pending("https://h.example/m1", 1, false, 1));
        queue.add(pending("https://h.example/h1", 1, true, 2));
        queue.add(pending("https://h.example/m2", 1, false, 3));
        queue.add(pending("https://h.example/h2", 1, true, 4));

        assert_eq!(queue.len(), 4);
        assert_eq!(urls(&queue), vec!["h1", "h2", "m1", "m2"]);
    }

    #[test]
    fn test_duplicates_merge() {
        let queue = FetchQueue::new();
        let first = queue.add(pending("https://h.example/a", 1, false, 1));
        let second = queue.add(pending("https://h.example/a", 1, false, 2));

        assert!(!first.merged);
        assert!(second.merged);
        assert_eq!(queue.len(), 1);

        let entry = queue.dequeue().unwrap();
        assert_eq!(entry.subscriber_count(), 2);
    }

    #[test]
    fn test_new_version_is_a_separate_entry() {
        let queue = FetchQueue::new();
        queue.add(pending("https://h.example/a", 1, false, 1));
        queue.add(pending("https://h.example/a", 2, false, 2));
        assert_eq!(queue.len(), 2);

        let v2 = Version::from_content_length("https://h.example/a", 2);
        assert!(queue.contains_version(&v2));
    }

    #[test]
    fn test_merged_progress_follows_existing_entry() {
        let queue = FetchQueue::new();
        let first = pending("https://h.example/a", 1, false, 1);
        let sender = Arc::clone(&first.job.progress);
        queue.add(first);
        let second = queue.add(pending("https://h.example/a", 1, false, 2));

        sender.send_replace(0.25);
        assert_eq!(*second.progress.borrow(), 0.25);
    }

    #[test]
    fn test_remove_detaches_then_drops() {
        let queue = FetchQueue::new();
        let a = pending("https://h.example/a", 1, false, 1);
        let key = a.entry_key();
        queue.add(a);
        queue.add(pending("https://h.example/a", 1, false, 2));
        assert!(queue.contains(&key));

        assert_eq!(queue.remove(&key, SubscriberId(1)).unwrap().id, SubscriberId(1));
        assert!(queue.contains(&key));
        assert!(queue.remove(&key, SubscriberId(1)).is_none());

        queue.remove(&key, SubscriberId(2)).unwrap();
        assert!(!queue.contains(&key));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_resource_and_clear() {
        let queue = FetchQueue::new();
        queue.add(pending("https://h.example/a", 1, false, 1));
        queue.add(pending("https://h.example/a", 2, true, 2));
        queue.add(pending("https://h.example/b", 1, false, 3));

        let key = *Resource::parse("https://h.example/a").unwrap().key();
        let removed = queue.remove_resource(&key);
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);

        queue.add(pending("https://h.example/c", 1, true, 4));
        assert_eq!(queue.clear().len(), 2);
        assert!(queue.is_empty());
    }
}
