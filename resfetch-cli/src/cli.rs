use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Versioned resource fetcher",
    long_about = "Fetches resources through a local versioned cache.\n\
                  \n\
                  Each URL is probed for its current version. Versions already on disk are\n\
                  served from the cache (and ahead of everything else); the rest are downloaded\n\
                  one at a time and stored under <cache>/<resource>/<version>/<file>.\n\
                  Duplicate URLs share a single download."
)]
pub struct CliArgs {
    /// URLs to fetch
    #[arg(required = true, help = "URL(s) to fetch (http, https or file)")]
    pub urls: Vec<String>,

    /// Cache root directory
    #[arg(
        long,
        help = "Directory holding the versioned cache (default: <temp>/resfetch-cache)"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Disable the cache entirely
    #[arg(long, help = "Do not read from or write to the cache")]
    pub no_cache: bool,

    /// Keep older versions when a new one is written
    #[arg(long, help = "Keep previously cached versions instead of evicting them")]
    pub keep_stale: bool,

    /// Fail a fetch when its payload cannot be cached
    #[arg(
        long,
        help = "Report an error instead of returning the payload when writing it to the cache fails"
    )]
    pub strict_cache: bool,

    /// Manifest suffix used for versioning
    #[arg(
        long,
        value_name = "SUFFIX",
        help = "Derive versions from a manifest at <url><SUFFIX> instead of the content length (e.g. \".manifest\")"
    )]
    pub manifest: Option<String>,

    /// Output directory for fetched payloads
    #[arg(
        short,
        long,
        help = "Directory where fetched payloads are written (nothing is written when omitted)"
    )]
    pub output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "60",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// User agent override
    #[arg(long, help = "User-Agent header sent with every request")]
    pub user_agent: Option<String>,

    /// Custom HTTP headers
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type (http, https, socks5, all)
    #[arg(
        long,
        default_value = "http",
        help = "Proxy type (http, https, socks5, all)",
        value_parser = ["http", "https", "socks5", "all"]
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Disable all proxy settings
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy)"
    )]
    pub no_proxy: bool,

    /// Hide progress bars
    #[arg(long, help = "Do not show progress bars")]
    pub no_progress: bool,
}
