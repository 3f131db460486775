//! # resfetch
//!
//! A client-side resource fetch coordinator. Given a URL it decides whether a
//! locally cached copy is current, fetches a fresh copy when needed, persists
//! it under a content-version key and hands the result to every interested
//! caller.
//!
//! ## Features
//!
//! - Version resolution from a remote probe with offline fallback to the cache
//! - Two-class priority queue (cache hits ahead of cache misses)
//! - Coalescing of duplicate requests into a single transfer
//! - Single-flight drain loop with cooperative cancellation
//! - On-disk `root/<key>/<version>/<file>` layout with stale-version eviction
//! - Pluggable transport, decoder and free-space probe

pub mod builder;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod proxy;
pub mod queue;
pub mod request;
pub mod transport;
pub mod version;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::FetchConfigBuilder;
pub use cache::{
    DiskSpaceProbe, FixedSpace, ParseVersionError, Resource, ResourceKey, SpaceProbe, StoreError,
    UnlimitedSpace, Version, VersionedCacheStore,
};
pub use config::{CacheConfig, FetchConfig};
pub use coordinator::DownloadCoordinator;
pub use decoder::{
    BytesDecoder, DecodeError, Decoder, FnDecoder, JsonDecoder, TextDecoder, decode_with,
};
pub use error::FetchError;
pub use queue::{Enqueued, EntryKey, FetchQueue, FetchSource, PendingRequest};
pub use request::{FetchHandle, FetchRequest, SubscriberId, Subscription};
pub use transport::{HttpTransport, ProgressFn, Transport, TransportError};
pub use version::{VersionResolver, VersionStrategy};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
