//! # Transport
//!
//! The byte-moving capability the coordinator is built on. The coordinator
//! only ever asks two questions of a transport: how big a resource is, and
//! what its bytes are.

mod error;
mod http;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use error::TransportError;
pub use http::{HttpTransport, create_client};

/// Progress callback receiving the completed fraction in `[0, 1]`
pub type ProgressFn = dyn Fn(f32) + Send + Sync;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Size of the resource in bytes, without downloading it
    async fn fetch_size(&self, url: &Url) -> Result<u64, TransportError>;

    /// Download the whole resource.
    ///
    /// Implementations check `cancel` at least once per received chunk and
    /// return [`TransportError::Cancelled`] once it fires.
    async fn fetch_bytes(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        on_progress: &ProgressFn,
    ) -> Result<Bytes, TransportError>;
}
