use std::sync::Arc;

use super::types::{ResourceKey, Version};

#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("No cached entry for {key}/{version}")]
    NotFound { key: ResourceKey, version: Version },
    #[error("Not enough free space to cache {required} bytes ({available} available)")]
    InsufficientSpace { required: u64, available: u64 },
    #[error("Caching is disabled")]
    Disabled,
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
}

// Manual implementation of From<std::io::Error> for StoreError
// because of the Arc wrapping.
impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            source: Arc::new(err),
        }
    }
}
