//! # Builder for FetchConfig
//!
//! Fluent construction of [`FetchConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use resfetch_engine::{FetchConfig, VersionStrategy};
//!
//! let config = FetchConfig::builder()
//!     .with_cache_root("/tmp/my-app-cache")
//!     .with_stale_eviction(true)
//!     .with_timeout(Duration::from_secs(60))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_version_strategy(VersionStrategy::manifest(".manifest"))
//!     .build();
//!
//! assert!(config.cache.enabled);
//! assert_eq!(config.user_agent, "MyApp/1.0");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::version::VersionStrategy;
use crate::{CacheConfig, FetchConfig, proxy::ProxyConfig};

/// Builder for creating FetchConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: FetchConfig::default(),
        }
    }

    /// Replace the whole cache configuration
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Enable or disable persistence
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    /// Set the cache root directory
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.cache.root = Some(root.into());
        self
    }

    /// Keep or drop older versions when a new one is written
    pub fn with_stale_eviction(mut self, evict: bool) -> Self {
        self.config.cache.evict_stale_versions = evict;
        self
    }

    /// Deliver fetched bytes even if writing them to the cache failed
    pub fn with_serve_on_persist_failure(mut self, serve: bool) -> Self {
        self.config.cache.serve_on_persist_failure = serve;
        self
    }

    /// Default version strategy for requests that do not pick one
    pub fn with_version_strategy(mut self, strategy: VersionStrategy) -> Self {
        self.config.version_strategy = strategy;
        self
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        // Only set system proxy if no explicit proxy is configured
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Build the FetchConfig instance
    pub fn build(self) -> FetchConfig {
        self.config
    }
}

impl Default for FetchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
