//! Shared helpers for unit tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::{ProgressFn, Transport, TransportError};

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
macro_rules! init_test_tracing {
    () => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

pub(crate) use init_test_tracing;

/// In-memory transport with switchable failure modes.
///
/// `fetch_bytes` reports 0.5 progress as soon as it starts, then waits for a
/// gate permit when the transport is gated, then reports 1.0 and returns.
#[derive(Debug, Default)]
pub struct MockTransport {
    resources: Mutex<HashMap<String, Bytes>>,
    broken: Mutex<HashSet<String>>,
    offline: AtomicBool,
    size_unavailable: AtomicBool,
    gate: Option<Semaphore>,
    size_calls: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose fetches block until [`MockTransport::release`] is called
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_resource(self, url: &str, content: &[u8]) -> Self {
        self.set_resource(url, content);
        self
    }

    pub fn set_resource(&self, url: &str, content: &[u8]) {
        self.resources
            .lock()
            .insert(url.to_string(), Bytes::copy_from_slice(content));
    }

    /// Let `n` gated fetches proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Every probe and fetch fails
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Size probes fail while fetches still work
    pub fn set_size_unavailable(&self, unavailable: bool) {
        self.size_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fetches of `url` fail with a server error
    pub fn break_url(&self, url: &str) {
        self.broken.lock().insert(url.to_string());
    }

    pub fn size_calls(&self) -> usize {
        self.size_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_bytes` calls that started
    pub fn fetch_calls(&self) -> usize {
        self.fetched.lock().len()
    }

    /// URLs passed to `fetch_bytes`, in call order
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Other("offline".to_string()));
        }
        Ok(())
    }

    fn lookup(&self, url: &Url) -> Result<Bytes, TransportError> {
        self.resources
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or(TransportError::Status(StatusCode::NOT_FOUND))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_size(&self, url: &Url) -> Result<u64, TransportError> {
        self.size_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.size_unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::MissingContentLength(url.to_string()));
        }
        Ok(self.lookup(url)?.len() as u64)
    }

    async fn fetch_bytes(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        on_progress: &ProgressFn,
    ) -> Result<Bytes, TransportError> {
        self.fetched.lock().push(url.to_string());
        self.check_online()?;
        on_progress(0.5);

        if let Some(gate) = &self.gate {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                permit = gate.acquire() => {
                    permit
                        .map_err(|e| TransportError::Other(e.to_string()))?
                        .forget();
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.broken.lock().contains(url.as_str()) {
            return Err(TransportError::Status(StatusCode::INTERNAL_SERVER_ERROR));
        }

        let bytes = self.lookup(url)?;
        on_progress(1.0);
        Ok(bytes)
    }
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await a future, panicking if it takes more than a few seconds
pub async fn finish<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("future did not complete in time")
}

/// Shorthand for sharing a mock as a transport object
pub fn shared(transport: MockTransport) -> (Arc<MockTransport>, Arc<dyn Transport>) {
    let mock = Arc::new(transport);
    let dynamic: Arc<dyn Transport> = mock.clone();
    (mock, dynamic)
}
