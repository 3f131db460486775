use std::sync::Arc;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("HTTP status error: {0}")]
    Status(StatusCode),

    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },

    #[error("Missing or invalid Content-Length for {0}")]
    MissingContentLength(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Proxy configuration error: {0}")]
    Proxy(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            source: Arc::new(err),
        }
    }
}
