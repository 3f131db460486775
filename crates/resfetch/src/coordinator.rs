//! # Download Coordinator
//!
//! Accepts requests, resolves their versions, queues them and drains the
//! queue with at most one transfer in flight.
//!
//! ## Lifecycle of a request
//!
//! 1. The URL is parsed and its version resolved (remote probe, falling back
//!    to the newest cached version).
//! 2. If that version is on disk the entry becomes a cache hit and will be
//!    read from the store instead of the network.
//! 3. The request joins the active transfer when it has the same key, merges
//!    into an equal queued entry, or is queued in its priority lane.
//! 4. A single drain task services entries one after another and fans each
//!    outcome out to every subscriber of the entry. A miss whose version was
//!    cached in the meantime is read from the store instead.
//!
//! Lock order is always the drain slot first, then the queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{
    DiskSpaceProbe, Resource, SpaceProbe, StoreError, Version, VersionedCacheStore,
};
use crate::config::FetchConfig;
use crate::decoder::Decoder;
use crate::error::FetchError;
use crate::queue::{EntryKey, FetchQueue, FetchSource, Job, PendingRequest};
use crate::request::{FetchHandle, FetchRequest, Subscriber, SubscriberId, Subscription};
use crate::transport::{HttpTransport, Transport};
use crate::version::{VersionResolver, VersionStrategy};

/// The entry currently being serviced by the drain loop
struct ActiveEntry {
    entry: EntryKey,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<f32>>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct DrainSlot {
    running: bool,
    active: Option<ActiveEntry>,
}

struct Inner {
    config: FetchConfig,
    transport: Arc<dyn Transport>,
    store: Option<Arc<VersionedCacheStore>>,
    resolver: VersionResolver,
    queue: FetchQueue,
    slot: Mutex<DrainSlot>,
    next_id: AtomicU64,
}

/// Coordinates versioned, coalesced and ordered resource fetches.
///
/// Cloning is cheap; clones share the same queue, cache and drain loop.
/// Independent coordinators never share state.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    /// Coordinator with the HTTP transport and disk-backed space checks
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: FetchConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_parts(config, transport, Arc::new(DiskSpaceProbe))
    }

    pub fn with_parts(
        config: FetchConfig,
        transport: Arc<dyn Transport>,
        space: Arc<dyn SpaceProbe>,
    ) -> Self {
        let store = config.cache.enabled.then(|| {
            Arc::new(VersionedCacheStore::with_space_probe(
                config.cache.root_dir(),
                space,
            ))
        });

        match &store {
            Some(store) => info!(root = %store.root().display(), "Cache enabled"),
            None => info!("Cache disabled"),
        }

        Self {
            inner: Arc::new(Inner {
                resolver: VersionResolver::new(store.clone()),
                config,
                transport,
                store,
                queue: FetchQueue::new(),
                slot: Mutex::new(DrainSlot::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.inner.config
    }

    /// The backing store, `None` when caching is disabled
    pub fn store(&self) -> Option<&Arc<VersionedCacheStore>> {
        self.inner.store.as_ref()
    }

    /// Request `url`, decoded with `decoder`
    pub async fn request<D: Decoder>(
        &self,
        url: &str,
        decoder: D,
    ) -> Result<FetchHandle<D::Output>, FetchError> {
        self.request_with(FetchRequest::new(url, decoder)).await
    }

    /// Request with per-request transport and version strategy overrides
    pub async fn request_with<D: Decoder>(
        &self,
        request: FetchRequest<D>,
    ) -> Result<FetchHandle<D::Output>, FetchError> {
        let FetchRequest {
            url,
            decoder,
            transport,
            strategy,
        } = request;

        let id = self.next_id();
        let (subscriber, rx) = Subscriber::channel(id, decoder);
        let (subscription, progress) = self
            .inner
            .submit(&url, subscriber, transport, strategy)
            .await?;

        Ok(FetchHandle::new(subscription, rx, progress))
    }

    /// Request `url` and invoke `on_result` once with the decoded outcome.
    ///
    /// `on_result` runs on the drain task and should return quickly.
    pub async fn request_with_callback<D, F>(
        &self,
        url: &str,
        decoder: D,
        on_result: F,
    ) -> Result<Subscription, FetchError>
    where
        D: Decoder,
        F: FnOnce(Result<D::Output, FetchError>) + Send + 'static,
    {
        let id = self.next_id();
        let subscriber = Subscriber::callback(id, decoder, on_result);
        let (subscription, _) = self.inner.submit(url, subscriber, None, None).await?;
        Ok(subscription)
    }

    /// Detach one subscriber, which receives [`FetchError::Cancelled`].
    ///
    /// When it was the last subscriber of its entry, a queued entry is dropped
    /// and an active transfer is cancelled. Returns `false` when the
    /// subscriber had already been served or cancelled.
    pub fn cancel(&self, subscription: &Subscription) -> bool {
        let entry = subscription.entry_key();
        let detached = {
            let mut slot = self.inner.slot.lock();
            let from_active = slot
                .active
                .as_mut()
                .filter(|active| active.entry == entry)
                .and_then(|active| {
                    let pos = active
                        .subscribers
                        .iter()
                        .position(|s| s.id == subscription.id())?;
                    let subscriber = active.subscribers.remove(pos);
                    if active.subscribers.is_empty() {
                        debug!(entry = %entry, "Last subscriber left, cancelling transfer");
                        active.cancel.cancel();
                    }
                    Some(subscriber)
                });

            from_active.or_else(|| self.inner.queue.remove(&entry, subscription.id()))
        };

        match detached {
            Some(subscriber) => {
                subscriber.deliver(Err(FetchError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Cancel every queued and active entry of `url`.
    ///
    /// Returns the number of subscribers that were cancelled.
    pub fn cancel_resource(&self, url: &str) -> Result<usize, FetchError> {
        let resource = Resource::parse(url)?;
        let mut cancelled = Vec::new();
        {
            let mut slot = self.inner.slot.lock();
            if let Some(active) = slot
                .active
                .as_mut()
                .filter(|active| active.entry.key == *resource.key())
            {
                active.cancel.cancel();
                cancelled.append(&mut active.subscribers);
            }
            for pending in self.inner.queue.remove_resource(resource.key()) {
                cancelled.extend(pending.into_parts().1);
            }
        }

        info!(url = %resource.url(), subscribers = cancelled.len(), "Cancelled resource");
        Ok(deliver_cancelled(cancelled))
    }

    /// Drop every queued entry and cancel the active transfer.
    ///
    /// Returns the number of subscribers that were cancelled.
    pub fn clear(&self) -> usize {
        let mut cancelled = Vec::new();
        {
            let mut slot = self.inner.slot.lock();
            if let Some(active) = slot.active.as_mut() {
                active.cancel.cancel();
                cancelled.append(&mut active.subscribers);
            }
            for pending in self.inner.queue.clear() {
                cancelled.extend(pending.into_parts().1);
            }
        }

        info!(subscribers = cancelled.len(), "Cleared fetch queue");
        deliver_cancelled(cancelled)
    }

    /// Delete every cached version of `url`
    pub async fn evict(&self, url: &str) -> Result<bool, FetchError> {
        let resource = Resource::parse(url)?;
        let store = self.inner.store.as_ref().ok_or(StoreError::Disabled)?;
        Ok(store.remove(resource.key()).await?)
    }

    /// Number of queued entries, not counting the active one
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether the drain loop has nothing left to do
    pub fn is_idle(&self) -> bool {
        !self.inner.slot.lock().running
    }

    fn next_id(&self) -> SubscriberId {
        SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("queue", &self.inner.queue)
            .field("idle", &self.is_idle())
            .finish()
    }
}

/// Hand an outcome to one subscriber, containing a panic in its decoder or callback
fn deliver_contained(subscriber: Subscriber, outcome: Result<Bytes, FetchError>) {
    let id = subscriber.id;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || subscriber.deliver(outcome)))
    {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(subscriber = %id, panic = %message, "Subscriber panicked during delivery");
    }
}

fn deliver_cancelled(subscribers: Vec<Subscriber>) -> usize {
    let count = subscribers.len();
    for subscriber in subscribers {
        subscriber.deliver(Err(FetchError::Cancelled));
    }
    count
}

impl Inner {
    async fn submit(
        self: &Arc<Self>,
        url: &str,
        subscriber: Subscriber,
        transport: Option<Arc<dyn Transport>>,
        strategy: Option<VersionStrategy>,
    ) -> Result<(Subscription, watch::Receiver<f32>), FetchError> {
        let resource = Resource::parse(url)?;
        let transport = transport.unwrap_or_else(|| Arc::clone(&self.transport));
        let strategy = strategy.unwrap_or_else(|| self.config.version_strategy.clone());

        let version = self
            .resolver
            .resolve(&resource, transport.as_ref(), &strategy)
            .await;

        let source = match &self.store {
            Some(store) if store.is_cached(&resource, &version).await => {
                FetchSource::Cache(store.entry_path(&resource, &version))
            }
            _ => FetchSource::Remote(resource.url().clone()),
        };

        let (progress, _) = watch::channel(0.0);
        let job = Job {
            resource,
            version,
            source,
            strategy,
            transport,
            progress: Arc::new(progress),
        };

        let subscription = Subscription {
            id: subscriber.id,
            entry: job.entry_key(),
            cache_hit: matches!(job.source, FetchSource::Cache(_)),
        };
        debug!(
            url = %job.resource.url(),
            version = %job.version,
            cache_hit = subscription.cache_hit,
            subscriber = %subscription.id,
            "Request resolved"
        );

        let progress = self.enqueue(PendingRequest::new(job, subscriber));
        Ok((subscription, progress))
    }

    fn enqueue(self: &Arc<Self>, pending: PendingRequest) -> watch::Receiver<f32> {
        let mut slot = self.slot.lock();
        let entry = pending.entry_key();

        if let Some(active) = slot.active.as_mut() {
            if active.entry == entry && !active.cancel.is_cancelled() {
                let (_, subscribers) = pending.into_parts();
                active.subscribers.extend(subscribers);
                debug!(entry = %entry, "Joined active transfer");
                return active.progress.subscribe();
            }
        }

        let enqueued = self.queue.add(pending);
        if !slot.running {
            slot.running = true;
            tokio::spawn(Arc::clone(self).drain());
        }
        enqueued.progress
    }

    async fn drain(self: Arc<Self>) {
        debug!("Drain loop started");
        loop {
            let (job, cancel) = {
                let mut slot = self.slot.lock();
                let Some(pending) = self.queue.dequeue() else {
                    slot.running = false;
                    slot.active = None;
                    debug!("Drain loop idle");
                    return;
                };

                let (job, subscribers) = pending.into_parts();
                let cancel = CancellationToken::new();
                slot.active = Some(ActiveEntry {
                    entry: job.entry_key(),
                    cancel: cancel.clone(),
                    progress: Arc::clone(&job.progress),
                    subscribers,
                });
                (job, cancel)
            };

            let outcome = self.service(&job, &cancel).await;
            match &outcome {
                Ok(bytes) => debug!(url = %job.resource.url(), size = bytes.len(), "Entry served"),
                Err(e) if e.is_cancelled() => info!(url = %job.resource.url(), "Transfer cancelled"),
                Err(e) => warn!(url = %job.resource.url(), error = %e, "Entry failed"),
            }

            let subscribers = {
                let mut slot = self.slot.lock();
                slot.active
                    .take()
                    .map(|active| active.subscribers)
                    .unwrap_or_default()
            };

            for subscriber in subscribers {
                deliver_contained(subscriber, outcome.clone());
            }
        }
    }

    async fn service(&self, job: &Job, cancel: &CancellationToken) -> Result<Bytes, FetchError> {
        if let Some(store) = &self.store {
            let cached = match &job.source {
                FetchSource::Cache(_) => true,
                // An earlier transfer of this version may have finished since resolution
                FetchSource::Remote(_) => {
                    job.version.is_known() && store.is_cached(&job.resource, &job.version).await
                }
            };

            if cached {
                match store.read(&job.resource, &job.version).await {
                    Ok(bytes) => {
                        job.progress.send_replace(1.0);
                        return Ok(bytes);
                    }
                    Err(e) => {
                        let path = store.entry_path(&job.resource, &job.version);
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Cached entry unavailable, fetching instead"
                        );
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let progress = Arc::clone(&job.progress);
        let gate = cancel.clone();
        let on_progress = move |fraction: f32| {
            if !gate.is_cancelled() {
                progress.send_replace(fraction.clamp(0.0, 1.0));
            }
        };

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            fetched = job.transport.fetch_bytes(job.resource.url(), cancel, &on_progress) => fetched?,
        };

        self.persist(job, &bytes).await?;
        if !cancel.is_cancelled() {
            job.progress.send_replace(1.0);
        }
        Ok(bytes)
    }

    /// Write a fetched payload, applying the persist-failure policy.
    ///
    /// Local `file://` resources are never copied into the cache. A payload
    /// fetched under the unknown version is stored under the fingerprint of
    /// its received length, which matches a later size probe because that
    /// probe asks for the unencoded length.
    async fn persist(&self, job: &Job, bytes: &Bytes) -> Result<(), FetchError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if job.resource.url().scheme() == "file" {
            return Ok(());
        }

        let version = if job.version.is_known() {
            job.version
        } else if job.strategy == VersionStrategy::ContentLength {
            // Store under the version a later successful probe will produce
            Version::from_content_length(job.resource.url().as_str(), bytes.len() as u64)
        } else {
            debug!(url = %job.resource.url(), "Version unknown, not caching");
            return Ok(());
        };

        match store
            .write(
                &job.resource,
                &version,
                bytes,
                self.config.cache.evict_stale_versions,
            )
            .await
        {
            Ok(path) => {
                debug!(path = %path.display(), version = %version, "Cached entry");
                Ok(())
            }
            Err(e) if self.config.cache.serve_on_persist_failure => {
                warn!(url = %job.resource.url(), error = %e, "Failed to cache entry, serving anyway");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
