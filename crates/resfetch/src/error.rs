use crate::cache::StoreError;
use crate::decoder::DecodeError;
use crate::transport::TransportError;

/// Outcome error delivered to the subscribers of a request.
///
/// Every variant is cheap to clone: one transfer fans its result out to all
/// subscribers that were coalesced onto it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Coordinator dropped the request before completing it")]
    ShutDown,
}

impl FetchError {
    /// Cancellation is a terminal outcome, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

// Transport cancellation surfaces as the same outcome as a caller-side cancel.
impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => FetchError::Cancelled,
            other => FetchError::Transport(other),
        }
    }
}
