//! Default [`Transport`] over reqwest, with `file://` support.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::{ProgressFn, Transport, TransportError};
use crate::FetchConfig;
use crate::proxy::build_proxy_from_config;

/// Upper bound for buffer preallocation from an advertised Content-Length
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &FetchConfig) -> Result<Client, TransportError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        // Explicit proxy configuration takes precedence
        let proxy = build_proxy_from_config(proxy_config)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for fetches");
    } else if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        debug!("Using system proxy settings for fetches");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for fetches");
    }

    client_builder.build().map_err(TransportError::from)
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn local_path(url: &Url) -> Result<std::path::PathBuf, TransportError> {
        url.to_file_path()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, url), fields(url = %url), level = "debug")]
    async fn fetch_size(&self, url: &Url) -> Result<u64, TransportError> {
        match url.scheme() {
            "file" => {
                let meta = tokio::fs::metadata(Self::local_path(url)?).await?;
                Ok(meta.len())
            }
            "http" | "https" => {
                // Ask for the unencoded length, which is what a decoded GET body measures
                let response = self
                    .client
                    .head(url.clone())
                    .header(ACCEPT_ENCODING, "identity")
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(TransportError::Status(response.status()));
                }

                // HEAD responses carry no body, so read the header directly
                response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| TransportError::MissingContentLength(url.to_string()))
            }
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    #[instrument(skip(self, url, cancel, on_progress), fields(url = %url), level = "debug")]
    async fn fetch_bytes(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        on_progress: &ProgressFn,
    ) -> Result<Bytes, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        match url.scheme() {
            "file" => {
                let data = tokio::fs::read(Self::local_path(url)?).await?;
                if cancel.is_cancelled() {
                    return Err(TransportError::Cancelled);
                }
                on_progress(1.0);
                Ok(Bytes::from(data))
            }
            "http" | "https" => {
                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    response = self.client.get(url.clone()).send() => response?,
                };

                if !response.status().is_success() {
                    return Err(TransportError::Status(response.status()));
                }

                let total = response.content_length().filter(|len| *len > 0);
                let mut buffer =
                    BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
                let mut stream = response.bytes_stream();

                loop {
                    let chunk = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        chunk = stream.next() => chunk,
                    };
                    let Some(chunk) = chunk else {
                        break;
                    };

                    buffer.extend_from_slice(&chunk?);
                    if let Some(total) = total {
                        on_progress((buffer.len() as f64 / total as f64).min(1.0) as f32);
                    }
                }

                debug!(size = buffer.len(), "Fetch complete");
                on_progress(1.0);
                Ok(buffer.freeze())
            }
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }
}
