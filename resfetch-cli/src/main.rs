use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use indicatif::MultiProgress;
use resfetch_engine::{
    BytesDecoder, DownloadCoordinator, FetchConfig, ProxyAuth, ProxyConfig, ProxyType, Resource,
    ResourceKey, VersionStrategy,
};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod error;
mod utils;

use cli::CliArgs;
use error::AppError;
use utils::parse_headers;
use utils::progress::ProgressManager;

/// Exit code when at least one URL could not be fetched
const EXIT_FETCH_FAILED: i32 = 2;

fn main() {
    match bootstrap() {
        Ok(0) => {}
        Ok(failed) => {
            eprintln!("{failed} URL(s) failed");
            std::process::exit(EXIT_FETCH_FAILED);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            // Log the full error for debugging
            error!(error = ?e, "Application failed");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn bootstrap() -> Result<usize, AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    let multi = MultiProgress::new();
    let progress_manager = if args.no_progress {
        ProgressManager::new_disabled(multi)
    } else {
        ProgressManager::new(multi)
    };

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(progress_manager.log_writer())
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = build_config(&args)?;
    let coordinator = DownloadCoordinator::new(config)?;

    let outputs = match &args.output {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            output_paths(dir, &args.urls)
        }
        None => vec![None; args.urls.len()],
    };

    let fetches = args
        .urls
        .iter()
        .zip(outputs)
        .map(|(url, output)| fetch_one(&coordinator, url, &progress_manager, output));

    let failed = join_all(fetches)
        .await
        .into_iter()
        .filter(|ok| !ok)
        .count();

    Ok(failed)
}

fn build_config(args: &CliArgs) -> Result<FetchConfig, AppError> {
    let mut builder = FetchConfig::builder()
        .with_caching_enabled(!args.no_cache)
        .with_stale_eviction(!args.keep_stale)
        .with_serve_on_persist_failure(!args.strict_cache)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout));

    if let Some(dir) = &args.cache_dir {
        builder = builder.with_cache_root(dir.clone());
    }

    if let Some(suffix) = &args.manifest {
        info!(suffix = %suffix, "Using manifest versioning");
        builder = builder.with_version_strategy(VersionStrategy::manifest(suffix.clone()));
    }

    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent.clone());
    }

    if !args.headers.is_empty() {
        let mut headers = FetchConfig::get_default_headers();
        headers.extend(parse_headers(&args.headers)?);
        builder = builder.with_headers(headers);
    }

    // Handle proxy configuration
    if args.no_proxy {
        // No proxy flag overrides everything else
        info!("All proxy settings disabled (--no-proxy flag)");
        builder = builder.with_system_proxy(false);
    } else if let Some(proxy_url) = &args.proxy {
        let proxy_type: ProxyType = args
            .proxy_type
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("Invalid proxy type: '{}'", args.proxy_type)))?;

        // Configure proxy authentication if both username and password are provided
        let auth = if let (Some(username), Some(password)) = (&args.proxy_user, &args.proxy_pass) {
            Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            })
        } else {
            None
        };

        info!(
            proxy_url = %proxy_url,
            proxy_type = ?proxy_type,
            has_auth = auth.is_some(),
            "Using explicit proxy configuration"
        );

        builder = builder.with_proxy(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type,
            auth,
        });
    }

    Ok(builder.build())
}

/// Fetch one URL, returning whether it succeeded
async fn fetch_one(
    coordinator: &DownloadCoordinator,
    url: &str,
    progress_manager: &ProgressManager,
    output: Option<PathBuf>,
) -> bool {
    let bar = progress_manager.add(url);

    let mut handle = match coordinator.request(url, BytesDecoder).await {
        Ok(handle) => handle,
        Err(e) => {
            bar.abandon(format!("Failed {url}"));
            error!(url = %url, error = %e, "Request rejected");
            return false;
        }
    };

    let subscription = *handle.subscription();
    let mut progress = handle.progress();
    let result = loop {
        tokio::select! {
            result = &mut handle => break result,
            Ok(()) = progress.changed() => bar.set_fraction(*progress.borrow_and_update()),
        }
    };

    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            bar.abandon(format!("Failed {url}"));
            error!(url = %url, error = %e, "Fetch failed");
            return false;
        }
    };

    bar.set_fraction(1.0);
    bar.finish(format!("Fetched {url}"));
    info!(
        url = %url,
        version = %subscription.version(),
        cache_hit = subscription.is_cache_hit(),
        size = bytes.len(),
        "Fetched"
    );

    if let Some(path) = output {
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => debug!(path = %path.display(), "Wrote payload"),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to write payload");
                return false;
            }
        }
    }

    true
}

/// Output file for each URL, `None` for URLs that do not parse.
///
/// Files are named after the URL's last path segment. When different URLs
/// share that name, each file is prefixed with its resource key.
fn output_paths(dir: &Path, urls: &[String]) -> Vec<Option<PathBuf>> {
    let resources: Vec<_> = urls.iter().map(|url| Resource::parse(url).ok()).collect();

    let mut owners: HashMap<&str, HashSet<ResourceKey>> = HashMap::new();
    for resource in resources.iter().flatten() {
        owners
            .entry(resource.file_name())
            .or_default()
            .insert(*resource.key());
    }

    resources
        .iter()
        .map(|resource| {
            resource.as_ref().map(|resource| {
                let name = resource.file_name();
                if owners.get(name).is_some_and(|keys| keys.len() > 1) {
                    dir.join(format!("{}-{name}", resource.key()))
                } else {
                    dir.join(name)
                }
            })
        })
        .collect()
}
