use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;
use crate::version::VersionStrategy;

const DEFAULT_USER_AGENT: &str = concat!("resfetch/", env!("CARGO_PKG_VERSION"));

/// Directory name used under the system temp dir when no cache root is set
const DEFAULT_CACHE_DIR: &str = "resfetch-cache";

/// Configuration for the versioned on-disk cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether fetched resources are persisted and served from disk
    pub enabled: bool,
    /// Root of the `<key>/<version>/<file>` layout
    pub root: Option<PathBuf>,
    /// Delete every other version of a resource when a new one is written
    pub evict_stale_versions: bool,
    /// Deliver freshly fetched bytes even when persisting them failed
    pub serve_on_persist_failure: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None, // If None, we'll use system temp dir
            evict_stale_versions: true,
            serve_on_persist_failure: true,
        }
    }
}

impl CacheConfig {
    /// Cache configuration rooted at `root`
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Configuration with persistence turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// The effective cache root
    pub fn root_dir(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR))
    }
}

/// Configurable options for the coordinator and its default HTTP transport
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Cache configuration
    pub cache: CacheConfig,

    /// How versions are resolved when a request does not say otherwise
    pub version_strategy: VersionStrategy,

    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            version_strategy: VersionStrategy::default(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetchConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true, // Enable system proxy by default
        }
    }
}

impl FetchConfig {
    pub fn builder() -> crate::builder::FetchConfigBuilder {
        crate::builder::FetchConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers
    }
}
