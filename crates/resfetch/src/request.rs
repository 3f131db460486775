//! # Requests and Subscriptions
//!
//! A request is fanned out to one or more subscribers. Each subscriber owns a
//! decoder and a delivery channel (a future handle or a callback), so the same
//! payload can be decoded into different types for different callers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{oneshot, watch};

use crate::cache::{ResourceKey, Version};
use crate::decoder::Decoder;
use crate::error::FetchError;
use crate::queue::EntryKey;
use crate::transport::Transport;
use crate::version::VersionStrategy;

/// Identifies one subscriber within a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives the raw outcome of a transfer and decodes it for its caller
pub(crate) trait ResultSink: Send {
    fn deliver(self: Box<Self>, outcome: Result<Bytes, FetchError>);
}

struct ChannelSink<D: Decoder> {
    decoder: D,
    tx: oneshot::Sender<Result<D::Output, FetchError>>,
}

impl<D: Decoder> ResultSink for ChannelSink<D> {
    fn deliver(self: Box<Self>, outcome: Result<Bytes, FetchError>) {
        let ChannelSink { decoder, tx } = *self;
        let result = outcome.and_then(|bytes| decoder.decode(bytes).map_err(FetchError::from));
        // The handle may have been dropped
        let _ = tx.send(result);
    }
}

struct CallbackSink<D, F> {
    decoder: D,
    callback: F,
}

impl<D, F> ResultSink for CallbackSink<D, F>
where
    D: Decoder,
    F: FnOnce(Result<D::Output, FetchError>) + Send + 'static,
{
    fn deliver(self: Box<Self>, outcome: Result<Bytes, FetchError>) {
        let CallbackSink { decoder, callback } = *self;
        callback(outcome.and_then(|bytes| decoder.decode(bytes).map_err(FetchError::from)));
    }
}

pub(crate) struct Subscriber {
    pub(crate) id: SubscriberId,
    sink: Box<dyn ResultSink>,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriberId, sink: Box<dyn ResultSink>) -> Self {
        Self { id, sink }
    }

    /// Subscriber resolving a [`FetchHandle`]
    pub(crate) fn channel<D: Decoder>(
        id: SubscriberId,
        decoder: D,
    ) -> (Self, oneshot::Receiver<Result<D::Output, FetchError>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(id, Box::new(ChannelSink { decoder, tx })), rx)
    }

    /// Subscriber invoking `callback` exactly once
    pub(crate) fn callback<D, F>(id: SubscriberId, decoder: D, callback: F) -> Self
    where
        D: Decoder,
        F: FnOnce(Result<D::Output, FetchError>) + Send + 'static,
    {
        Self::new(id, Box::new(CallbackSink { decoder, callback }))
    }

    pub(crate) fn deliver(self, outcome: Result<Bytes, FetchError>) {
        self.sink.deliver(outcome);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// Ticket identifying one subscriber of one queued or active entry.
///
/// Pass it to [`crate::DownloadCoordinator::cancel`] to detach the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) id: SubscriberId,
    pub(crate) entry: EntryKey,
    pub(crate) cache_hit: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.entry.key
    }

    /// Version the request resolved to
    pub fn version(&self) -> &Version {
        &self.entry.version
    }

    /// Whether the resolved version was already on disk when requested
    pub fn is_cache_hit(&self) -> bool {
        self.cache_hit
    }

    pub fn entry_key(&self) -> EntryKey {
        self.entry
    }
}

/// Pending result of a request.
///
/// Resolves once the transfer it subscribed to completes, fails or is
/// cancelled. Dropping the handle does not cancel the transfer.
pub struct FetchHandle<T> {
    subscription: Subscription,
    rx: oneshot::Receiver<Result<T, FetchError>>,
    progress: watch::Receiver<f32>,
}

impl<T> FetchHandle<T> {
    pub(crate) fn new(
        subscription: Subscription,
        rx: oneshot::Receiver<Result<T, FetchError>>,
        progress: watch::Receiver<f32>,
    ) -> Self {
        Self {
            subscription,
            rx,
            progress,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.subscription.id
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Transfer progress in `[0, 1]`
    pub fn progress(&self) -> watch::Receiver<f32> {
        self.progress.clone()
    }
}

impl<T> Future for FetchHandle<T> {
    type Output = Result<T, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(FetchError::ShutDown)))
    }
}

impl<T> fmt::Debug for FetchHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle")
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// A request with per-request overrides
pub struct FetchRequest<D> {
    pub(crate) url: String,
    pub(crate) decoder: D,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) strategy: Option<VersionStrategy>,
}

impl<D: Decoder> FetchRequest<D> {
    pub fn new(url: impl Into<String>, decoder: D) -> Self {
        Self {
            url: url.into(),
            decoder,
            transport: None,
            strategy: None,
        }
    }

    /// Use this transport instead of the coordinator's
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolve the version with this strategy instead of the configured one
    pub fn with_version_strategy(mut self, strategy: VersionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}
